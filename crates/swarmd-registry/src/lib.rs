//! Service discovery registry: an in-memory, last-writer-convergent map
//! from `(namespace, service)` to healthy endpoints, kept fresh by update
//! traffic rather than active probing.

pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use swarmd_core::error::{Error, Result};
use swarmd_core::model::ServiceEndpoint;
use swarmd_core::Transport;
use wire::{ServiceUpdateMessage, UpdateAction};

/// How long an endpoint may go without a refresh before it is excluded
/// from resolution and routing.
pub const FRESHNESS_WINDOW: StdDuration = StdDuration::from_secs(30);
/// How often the liveness sweep runs.
pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

struct Entry {
    endpoint: ServiceEndpoint,
    /// Monotonic observation time used for freshness checks; `endpoint`
    /// keeps the wall-clock `last_seen` used for the wire format and
    /// persistence.
    seen_at: Instant,
}

pub struct Registry {
    transport: Arc<dyn Transport>,
    endpoints: RwLock<HashMap<ServiceKey, HashMap<String, Entry>>>,
}

impl Registry {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            endpoints: RwLock::new(HashMap::new()),
        })
    }

    /// Spawns the 10s liveness sweep. The returned handle is owned by the
    /// caller, same as any other periodic background task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    async fn sweep(&self) {
        let mut endpoints = self.endpoints.write().await;
        for (key, pods) in endpoints.iter_mut() {
            for (pod_id, entry) in pods.iter_mut() {
                if entry.endpoint.healthy && entry.seen_at.elapsed() > FRESHNESS_WINDOW {
                    entry.endpoint.healthy = false;
                    info!(namespace = %key.namespace, service = %key.service, pod_id = %pod_id, "endpoint went stale, marking unhealthy");
                }
            }
        }
        trace!("liveness sweep complete");
    }

    /// Registers a local endpoint for `pod` fronted by `service`, then
    /// broadcasts the update.
    pub async fn register(
        &self,
        namespace: &str,
        service_name: &str,
        node_name: &str,
        pod_id: &str,
        pod_name: &str,
        port: u16,
    ) -> Result<()> {
        let address = self.transport.local_address();
        let now = Utc::now();
        let endpoint = ServiceEndpoint {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            pod_id: pod_id.to_string(),
            pod_name: pod_name.to_string(),
            node_name: node_name.to_string(),
            address: address.clone(),
            port,
            healthy: true,
            last_seen: now,
        };
        self.insert_local(namespace, service_name, pod_id, endpoint.clone())
            .await;

        let mut message = ServiceUpdateMessage::new(UpdateAction::Register, namespace, service_name);
        message.pod_id = pod_id.to_string();
        message.pod_name = pod_name.to_string();
        message.node_name = node_name.to_string();
        message.address = address;
        message.port = port;
        message.healthy = true;
        message.timestamp = now;
        self.broadcast(&message).await;
        Ok(())
    }

    /// Removes a local endpoint and broadcasts the deregistration.
    pub async fn deregister(&self, namespace: &str, service_name: &str, pod_id: &str) -> Result<()> {
        let key = ServiceKey::new(namespace, service_name);
        self.endpoints
            .write()
            .await
            .get_mut(&key)
            .map(|pods| pods.remove(pod_id));

        let mut message =
            ServiceUpdateMessage::new(UpdateAction::Deregister, namespace, service_name);
        message.pod_id = pod_id.to_string();
        self.broadcast(&message).await;
        Ok(())
    }

    async fn insert_local(
        &self,
        namespace: &str,
        service_name: &str,
        pod_id: &str,
        endpoint: ServiceEndpoint,
    ) {
        let key = ServiceKey::new(namespace, service_name);
        let mut endpoints = self.endpoints.write().await;
        endpoints.entry(key).or_default().insert(
            pod_id.to_string(),
            Entry {
                endpoint,
                seen_at: Instant::now(),
            },
        );
    }

    async fn broadcast(&self, message: &ServiceUpdateMessage) {
        match serde_json::to_vec(message) {
            Ok(bytes) => self.transport.broadcast(bytes).await,
            Err(e) => warn!(error = %e, "failed to encode service_update message"),
        }
    }

    /// Decodes and applies an inbound `service_update` message. Unknown or
    /// malformed payloads are ignored here; the orchestration glue's
    /// dispatcher is responsible for
    /// routing only `service_update`-typed envelopes to this method.
    pub async fn handle_update(&self, bytes: &[u8]) {
        let message: ServiceUpdateMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "dropped malformed service_update message");
                return;
            }
        };
        match message.action {
            UpdateAction::Register => {
                let endpoint = ServiceEndpoint {
                    namespace: message.namespace.clone(),
                    service_name: message.service_name.clone(),
                    pod_id: message.pod_id.clone(),
                    pod_name: message.pod_name,
                    node_name: message.node_name,
                    address: message.address,
                    port: message.port,
                    healthy: message.healthy,
                    last_seen: message.timestamp,
                };
                self.insert_local(&message.namespace, &message.service_name, &message.pod_id, endpoint)
                    .await;
            }
            UpdateAction::Deregister => {
                let key = ServiceKey::new(message.namespace, message.service_name);
                self.endpoints
                    .write()
                    .await
                    .get_mut(&key)
                    .map(|pods| pods.remove(&message.pod_id));
            }
        }
    }

    fn is_fresh(entry: &Entry) -> bool {
        entry.endpoint.healthy && entry.seen_at.elapsed() <= FRESHNESS_WINDOW
    }

    /// `"{address}:{port}"` for each fresh, healthy endpoint. Errors with
    /// [`Error::NotFound`] when the filtered set is empty.
    pub async fn get_addresses(&self, namespace: &str, service_name: &str) -> Result<Vec<String>> {
        let addrs: Vec<String> = self
            .get_endpoints(namespace, service_name)
            .await
            .into_iter()
            .map(|e| format!("{}:{}", e.address, e.port))
            .collect();
        if addrs.is_empty() {
            Err(Error::NotFound(format!(
                "no healthy endpoints for {namespace}/{service_name}"
            )))
        } else {
            Ok(addrs)
        }
    }

    /// Structured, fresh endpoints for one service. Returns an empty
    /// vector for an unknown service — callers that need a hard error use
    /// [`Registry::get_addresses`].
    pub async fn get_endpoints(&self, namespace: &str, service_name: &str) -> Vec<ServiceEndpoint> {
        let key = ServiceKey::new(namespace, service_name);
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(&key)
            .map(|pods| {
                pods.values()
                    .filter(|e| Self::is_fresh(e))
                    .map(|e| e.endpoint.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All service keys with their currently fresh endpoints.
    pub async fn list_services(&self) -> HashMap<ServiceKey, Vec<ServiceEndpoint>> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .map(|(key, pods)| {
                let fresh = pods
                    .values()
                    .filter(|e| Self::is_fresh(e))
                    .map(|e| e.endpoint.clone())
                    .collect();
                (key.clone(), fresh)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeTransport {
        address: String,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn broadcast(&self, payload: Vec<u8>) {
            self.sent.lock().unwrap().push(payload);
        }

        fn local_address(&self) -> String {
            self.address.clone()
        }
    }

    fn fake_transport() -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            address: "10.0.0.1".to_string(),
            sent: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn register_then_get_addresses_roundtrip() {
        let registry = Registry::new(fake_transport());
        registry
            .register("default", "postgres", "node-1", "pod-1", "postgres-0", 5432)
            .await
            .unwrap();
        let addrs = registry.get_addresses("default", "postgres").await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:5432".to_string()]);
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let registry = Registry::new(fake_transport());
        let err = registry.get_addresses("default", "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn deregister_removes_endpoint() {
        let registry = Registry::new(fake_transport());
        registry
            .register("default", "postgres", "node-1", "pod-1", "postgres-0", 5432)
            .await
            .unwrap();
        registry.deregister("default", "postgres", "pod-1").await.unwrap();
        assert!(registry.get_addresses("default", "postgres").await.is_err());
    }

    #[tokio::test]
    async fn handle_update_register_is_visible_to_readers() {
        let registry = Registry::new(fake_transport());
        let mut message = ServiceUpdateMessage::new(UpdateAction::Register, "default", "web");
        message.pod_id = "pod-7".into();
        message.node_name = "node-2".into();
        message.address = "10.0.0.9".into();
        message.port = 8080;
        let bytes = serde_json::to_vec(&message).unwrap();
        registry.handle_update(&bytes).await;
        let addrs = registry.get_addresses("default", "web").await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.9:8080".to_string()]);
    }

    #[tokio::test]
    async fn stale_endpoint_is_filtered_after_sweep() {
        let registry = Registry::new(fake_transport());
        registry
            .register("default", "postgres", "node-1", "pod-1", "postgres-0", 5432)
            .await
            .unwrap();
        {
            let mut endpoints = registry.endpoints.write().await;
            for pods in endpoints.values_mut() {
                for entry in pods.values_mut() {
                    entry.seen_at = Instant::now() - FRESHNESS_WINDOW - StdDuration::from_secs(1);
                }
            }
        }
        registry.sweep().await;
        assert!(registry.get_addresses("default", "postgres").await.is_err());
    }
}
