//! Last-writer-wins anti-entropy merge.
//!
//! Deployments/Services/Ingresses are replaced wholesale from the
//! incoming snapshot when it is newer. This is a known tradeoff: a
//! locally-unique addition made during the sync window is lost if an
//! incoming snapshot that predates it (but has a later `last_modified`
//! because of an unrelated edit) wins. Pods get per-record precedence by
//! `created_at` instead: the record whose `created_at` is greater always
//! survives the merge, regardless of which snapshot it came from.

use chrono::Utc;

use swarmd_core::model::ClusterState;

/// Returns `true` if `incoming` was applied (it was strictly newer).
pub fn merge(local: &mut ClusterState, incoming: &ClusterState) -> bool {
    if incoming.last_modified <= local.last_modified {
        return false;
    }

    local.deployments = incoming.deployments.clone();
    local.services = incoming.services.clone();
    local.ingresses = incoming.ingresses.clone();

    for (key, incoming_pod) in &incoming.pods {
        match local.pods.get(key) {
            Some(local_pod) if local_pod.created_at >= incoming_pod.created_at => {}
            _ => {
                local.pods.insert(key.clone(), incoming_pod.clone());
            }
        }
    }

    local.last_modified = Utc::now();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use swarmd_core::model::{Deployment, Pod, PodState};
    use swarmd_core::model::Labels;

    fn pod(created_at: chrono::DateTime<Utc>) -> Pod {
        Pod {
            id: None,
            name: "p".into(),
            namespace: "default".into(),
            node_name: None,
            image: "x".into(),
            labels: Labels::new(),
            annotations: Labels::new(),
            ports: vec![],
            env: vec![],
            volume_mounts: vec![],
            node_selector: Labels::new(),
            state: PodState::Running,
            created_at,
        }
    }

    fn deployment(replicas: u32) -> Deployment {
        Deployment {
            namespace: "default".into(),
            name: "d".into(),
            replicas_desired: replicas,
            template: pod(Utc::now()),
            selector: Labels::new(),
            pods: vec![],
        }
    }

    #[test]
    fn newer_incoming_overwrites_matching_deployment_key() {
        let now = Utc::now();
        let mut local = ClusterState::new(now);
        local.deployments.insert("default/d".into(), deployment(1));

        let mut incoming = ClusterState::new(now + Duration::seconds(5));
        incoming.deployments.insert("default/d".into(), deployment(3));

        assert!(merge(&mut local, &incoming));
        assert_eq!(local.deployments["default/d"].replicas_desired, 3);
    }

    #[test]
    fn older_or_equal_incoming_changes_nothing() {
        let now = Utc::now();
        let mut local = ClusterState::new(now);
        local.deployments.insert("default/d".into(), deployment(1));

        let incoming = ClusterState::new(now);
        assert!(!merge(&mut local, &incoming));
        assert_eq!(local.deployments["default/d"].replicas_desired, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let now = Utc::now();
        let mut local = ClusterState::new(now);
        let mut incoming = ClusterState::new(now + Duration::seconds(1));
        incoming.deployments.insert("default/d".into(), deployment(2));

        assert!(merge(&mut local, &incoming));
        // re-merging the same incoming snapshot is now a no-op because
        // local.last_modified was bumped to "now" of the first merge.
        assert!(!merge(&mut local, &incoming));
    }

    #[test]
    fn pods_use_per_record_created_at_precedence() {
        let now = Utc::now();
        let mut local = ClusterState::new(now);
        let older_pod = pod(now - Duration::seconds(10));
        local.pods.insert("default/p".into(), older_pod);

        let mut incoming = ClusterState::new(now + Duration::seconds(1));
        let newer_pod = pod(now);
        incoming.pods.insert("default/p".into(), newer_pod.clone());

        assert!(merge(&mut local, &incoming));
        assert_eq!(local.pods["default/p"].created_at, newer_pod.created_at);
    }

    #[test]
    fn locally_newer_pod_survives_an_otherwise_dominant_incoming_snapshot() {
        let now = Utc::now();
        let mut local = ClusterState::new(now);
        let newer_local_pod = pod(now);
        local.pods.insert("default/p".into(), newer_local_pod.clone());

        let mut incoming = ClusterState::new(now + Duration::seconds(1));
        let older_incoming_pod = pod(now - Duration::seconds(30));
        incoming.pods.insert("default/p".into(), older_incoming_pod);

        assert!(merge(&mut local, &incoming));
        assert_eq!(local.pods["default/p"].created_at, newer_local_pod.created_at);
    }
}
