//! Persistent declared-state store: the authoritative, locally-durable
//! copy of [`ClusterState`], replicated to peers by gossiping full
//! snapshots rather than individual operations.

pub mod merge;
pub mod persist;
pub mod wire;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use swarmd_core::error::Result;
use swarmd_core::model::{ClusterState, Deployment, Ingress, Pod, Service};
use swarmd_core::Transport;
use wire::StateSyncMessage;

/// How often each node broadcasts its full `ClusterState`.
pub const SYNC_INTERVAL: StdDuration = StdDuration::from_secs(30);
/// How often a timestamped backup snapshot is written to disk.
pub const BACKUP_INTERVAL: StdDuration = StdDuration::from_secs(3600);

pub struct Store {
    transport: Arc<dyn Transport>,
    node_name: String,
    data_dir: PathBuf,
    state: RwLock<ClusterState>,
}

impl Store {
    /// Loads `data_dir/state.json` if present, starting from an empty
    /// state otherwise. A corrupt snapshot is logged and treated as
    /// absent; the file is left on disk for operator inspection.
    pub async fn load(transport: Arc<dyn Transport>, node_name: String, data_dir: PathBuf) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&data_dir).await.map_err(swarmd_core::error::Error::from)?;
        let path = persist::snapshot_path(&data_dir);
        let state = match persist::read(&path).await {
            Ok(Some(state)) => {
                info!(path = %path.display(), version = state.version, "loaded persisted cluster state");
                state
            }
            Ok(None) => {
                info!("no persisted cluster state found, starting empty");
                ClusterState::new(Utc::now())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "persisted cluster state is corrupt, starting empty");
                ClusterState::new(Utc::now())
            }
        };
        Ok(Arc::new(Self {
            transport,
            node_name,
            data_dir,
            state: RwLock::new(state),
        }))
    }

    /// Spawns the 30s anti-entropy broadcaster and the hourly backup
    /// writer, mirroring the periodic-task-ownership pattern used by
    /// [`swarmd_registry::Registry::spawn_sweeper`].
    pub fn spawn_background_tasks(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let broadcaster = {
            let store = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(SYNC_INTERVAL);
                loop {
                    ticker.tick().await;
                    store.broadcast_state().await;
                }
            })
        };
        let backup = {
            let store = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(BACKUP_INTERVAL);
                loop {
                    ticker.tick().await;
                    if let Err(e) = store.write_backup().await {
                        warn!(error = %e, "failed to write hourly backup");
                    }
                }
            })
        };
        (broadcaster, backup)
    }

    async fn broadcast_state(&self) {
        let state = self.state.read().await.clone();
        let message = StateSyncMessage::new(state, self.node_name.clone());
        match serde_json::to_vec(&message) {
            Ok(bytes) => self.transport.broadcast(bytes).await,
            Err(e) => warn!(error = %e, "failed to encode state_sync message"),
        }
    }

    async fn write_backup(&self) -> Result<()> {
        let state = self.state.read().await.clone();
        let timestamp = state.last_modified.format("%Y%m%dT%H%M%SZ").to_string();
        let path = persist::backup_path(&self.data_dir, &timestamp);
        persist::write_atomic(&path, &state).await
    }

    async fn persist(&self, state: &ClusterState) -> Result<()> {
        let path = persist::snapshot_path(&self.data_dir);
        persist::write_atomic(&path, state).await
    }

    /// Decodes and merges an inbound `state_sync` message. Malformed
    /// payloads are dropped; the orchestration glue's dispatcher is
    /// responsible for routing only
    /// `state_sync`-typed envelopes here.
    pub async fn handle_state_sync(&self, bytes: &[u8]) {
        let message: StateSyncMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "dropped malformed state_sync message");
                return;
            }
        };
        let mut state = self.state.write().await;
        if merge::merge(&mut state, &message.state) {
            debug!(from = %message.node_name, version = state.version, "merged incoming cluster state");
            if let Err(e) = self.persist(&state).await {
                warn!(error = %e, "failed to persist merged cluster state");
            }
        }
    }

    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ClusterState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
        state.last_modified = Utc::now();
        state.version += 1;
        self.persist(&state).await
    }

    pub async fn snapshot(&self) -> ClusterState {
        self.state.read().await.clone()
    }
}

macro_rules! entity_store {
    ($save:ident, $get:ident, $delete:ident, $list:ident, $field:ident, $entity:ty, $key_fn:expr) => {
        impl Store {
            pub async fn $save(&self, entity: $entity) -> Result<()> {
                let key = $key_fn(&entity);
                self.mutate(move |state| {
                    state.$field.insert(key, entity);
                })
                .await
            }

            pub async fn $get(&self, key: &str) -> Option<$entity> {
                self.state.read().await.$field.get(key).cloned()
            }

            pub async fn $delete(&self, key: &str) -> Result<bool> {
                let mut removed = false;
                self.mutate(|state| {
                    removed = state.$field.remove(key).is_some();
                })
                .await?;
                Ok(removed)
            }

            pub async fn $list(&self) -> Vec<$entity> {
                self.state.read().await.$field.values().cloned().collect()
            }
        }
    };
}

entity_store!(
    save_deployment,
    get_deployment,
    delete_deployment,
    list_deployments,
    deployments,
    Deployment,
    |d: &Deployment| format!("{}/{}", d.namespace, d.name)
);

entity_store!(
    save_service,
    get_service,
    delete_service,
    list_services,
    services,
    Service,
    |s: &Service| format!("{}/{}", s.namespace, s.name)
);

entity_store!(
    save_ingress,
    get_ingress,
    delete_ingress,
    list_ingresses,
    ingresses,
    Ingress,
    |i: &Ingress| format!("{}/{}", i.namespace, i.name)
);

entity_store!(
    save_pod,
    get_pod,
    delete_pod,
    list_pods,
    pods,
    Pod,
    |p: &Pod| format!("{}/{}", p.namespace, p.name)
);

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use swarmd_core::model::{Labels, PodState, ServiceType};

    struct FakeTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn broadcast(&self, payload: Vec<u8>) {
            self.sent.lock().unwrap().push(payload);
        }

        fn local_address(&self) -> String {
            "10.0.0.1".to_string()
        }
    }

    fn fake_transport() -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn pod(name: &str) -> Pod {
        Pod {
            id: None,
            name: name.to_string(),
            namespace: "default".into(),
            node_name: None,
            image: "x".into(),
            labels: Labels::new(),
            annotations: Labels::new(),
            ports: vec![],
            env: vec![],
            volume_mounts: vec![],
            node_selector: Labels::new(),
            state: PodState::Pending,
            created_at: Utc::now(),
        }
    }

    async fn fresh_store() -> Arc<Store> {
        let dir = tempfile::tempdir().unwrap();
        Store::load(fake_transport(), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn save_then_get_pod_round_trips() {
        let store = fresh_store().await;
        store.save_pod(pod("web-0")).await.unwrap();
        let got = store.get_pod("default/web-0").await.unwrap();
        assert_eq!(got.name, "web-0");
    }

    #[tokio::test]
    async fn delete_pod_removes_entry() {
        let store = fresh_store().await;
        store.save_pod(pod("web-0")).await.unwrap();
        assert!(store.delete_pod("default/web-0").await.unwrap());
        assert!(store.get_pod("default/web-0").await.is_none());
        assert!(!store.delete_pod("default/web-0").await.unwrap());
    }

    #[tokio::test]
    async fn list_services_reflects_saved_entries() {
        let store = fresh_store().await;
        let service = Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: ServiceType::ClusterIp,
            selector: Labels::new(),
            ports: vec![],
        };
        store.save_service(service).await.unwrap();
        let services = store.list_services().await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "web");
    }

    #[tokio::test]
    async fn mutation_persists_to_disk_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(fake_transport(), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap();
        store.save_pod(pod("web-0")).await.unwrap();
        drop(store);

        let reloaded = Store::load(fake_transport(), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(reloaded.get_pod("default/web-0").await.is_some());
    }

    #[tokio::test]
    async fn handle_state_sync_merges_newer_snapshot() {
        let store = fresh_store().await;
        let mut incoming = ClusterState::new(Utc::now() + chrono::Duration::seconds(10));
        incoming.pods.insert("default/web-0".into(), pod("web-0"));
        let message = StateSyncMessage::new(incoming, "node-2".into());
        let bytes = serde_json::to_vec(&message).unwrap();

        store.handle_state_sync(&bytes).await;
        assert!(store.get_pod("default/web-0").await.is_some());
    }

    #[tokio::test]
    async fn handle_state_sync_ignores_malformed_payload() {
        let store = fresh_store().await;
        store.handle_state_sync(b"not json").await;
        assert!(store.list_pods().await.is_empty());
    }
}
