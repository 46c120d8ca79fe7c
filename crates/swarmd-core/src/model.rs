//! Shared data model. Entities are identified by `(namespace, name)`
//! unless noted. Label maps use `BTreeMap` rather than `HashMap` so that
//! serialized manifests and snapshot diffs are deterministic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

/// A `(namespace, name)` key, formatted as `"<namespace>/<name>"` when
/// persisted — the map-key format used throughout the on-disk snapshot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) => Ok(Self::new(namespace, name)),
            None => Err(crate::error::Error::InvalidInput(format!(
                "malformed resource key: {s}"
            ))),
        }
    }
}

/// Returns true iff every key in `selector` exists in `labels` with the
/// same value.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    Gone,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Opaque, stable for the runtime-backed instance (the runtime adapter's id).
    pub id: Option<String>,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub node_name: Option<String>,
    pub image: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub node_selector: Labels,
    pub state: PodState,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub namespace: String,
    pub name: String,
    pub replicas_desired: u32,
    /// Pattern used to synthesize each replica's Pod record.
    pub template: Pod,
    pub selector: Labels,
    /// Derived list of current instance records.
    #[serde(default)]
    pub pods: Vec<Pod>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    ClusterIp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathType {
    Exact,
    Prefix,
    ImplementationSpecific,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPath {
    pub path: String,
    pub path_type: PathType,
    pub service_name: String,
    pub service_port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    pub rules: Vec<IngressRule>,
}

/// Derived, keyed by `(namespace, service, pod_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub namespace: String,
    pub service_name: String,
    pub pod_id: String,
    pub pod_name: String,
    pub node_name: String,
    pub address: String,
    pub port: u16,
    pub healthy: bool,
    pub last_seen: DateTime<Utc>,
}

/// The unit of persistence and anti-entropy exchange: everything a node
/// needs to reconstruct its declared workloads from disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub deployments: BTreeMap<String, Deployment>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default)]
    pub ingresses: BTreeMap<String, Ingress>,
    #[serde(default)]
    pub pods: BTreeMap<String, Pod>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl ClusterState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_modified: now,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_round_trips() {
        let key = ResourceKey::new("default", "postgres");
        assert_eq!(key.to_string(), "default/postgres");
        assert_eq!("default/postgres".parse::<ResourceKey>().unwrap(), key);
    }

    #[test]
    fn resource_key_rejects_malformed_input() {
        assert!("no-slash".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn selector_matches_requires_every_key() {
        let selector = Labels::from([("app".to_string(), "x".to_string())]);
        let matching = Labels::from([
            ("app".to_string(), "x".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        let mismatching = Labels::from([("app".to_string(), "y".to_string())]);
        assert!(selector_matches(&selector, &matching));
        assert!(!selector_matches(&selector, &mismatching));
        assert!(!selector_matches(&selector, &Labels::new()));
    }
}
