//! `swarmd-workload` owns only the trait boundary a container runtime
//! must satisfy, wrapping a narrow capability instead of exposing an
//! entire client API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use swarmd_core::error::Result;
use swarmd_core::model::{EnvVar, Labels, PodState, PortSpec, VolumeMount};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeId(pub String);

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the runtime adapter needs to realize one container: the cluster
/// DNS IP, labels, ports, env, and volume mounts.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: Labels,
    pub ports: Vec<PortSpec>,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
    pub dns_ip: String,
}

pub type RuntimeStatus = PodState;

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeId>;
    async fn start(&self, id: &RuntimeId) -> Result<()>;
    async fn stop(&self, id: &RuntimeId, grace: Duration) -> Result<()>;
    async fn remove(&self, id: &RuntimeId) -> Result<()>;
    async fn inspect(&self, id: &RuntimeId) -> Result<RuntimeStatus>;
    async fn pull(&self, image: &str) -> Result<()>;
    fn logs(&self, id: &RuntimeId) -> BoxStream<'static, Result<Bytes>>;
}

/// Logs intended actions and fabricates runtime ids. Stands in so the
/// crate compiles and its tests run without a real container engine —
/// not a production adapter.
pub struct LoggingRuntimeAdapter;

#[async_trait]
impl RuntimeAdapter for LoggingRuntimeAdapter {
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeId> {
        let id = RuntimeId(uuid::Uuid::new_v4().to_string());
        tracing::info!(container = %spec.name, image = %spec.image, runtime_id = %id, "create (logging adapter)");
        Ok(id)
    }

    async fn start(&self, id: &RuntimeId) -> Result<()> {
        tracing::info!(runtime_id = %id, "start (logging adapter)");
        Ok(())
    }

    async fn stop(&self, id: &RuntimeId, grace: Duration) -> Result<()> {
        tracing::info!(runtime_id = %id, ?grace, "stop (logging adapter)");
        Ok(())
    }

    async fn remove(&self, id: &RuntimeId) -> Result<()> {
        tracing::info!(runtime_id = %id, "remove (logging adapter)");
        Ok(())
    }

    async fn inspect(&self, id: &RuntimeId) -> Result<RuntimeStatus> {
        tracing::debug!(runtime_id = %id, "inspect (logging adapter)");
        Ok(RuntimeStatus::Running)
    }

    async fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image = %image, "pull (logging adapter)");
        Ok(())
    }

    fn logs(&self, _id: &RuntimeId) -> BoxStream<'static, Result<Bytes>> {
        Box::pin(futures::stream::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "web-0".into(),
            image: "docker.io/library/nginx".into(),
            labels: Labels::new(),
            ports: vec![],
            env: vec![],
            volume_mounts: vec![],
            dns_ip: "10.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn logging_adapter_round_trips_lifecycle() {
        let adapter = LoggingRuntimeAdapter;
        let id = adapter.create(&spec()).await.unwrap();
        adapter.start(&id).await.unwrap();
        assert_eq!(adapter.inspect(&id).await.unwrap(), RuntimeStatus::Running);
        adapter.stop(&id, Duration::from_secs(1)).await.unwrap();
        adapter.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn logging_adapter_logs_stream_is_empty() {
        let adapter = LoggingRuntimeAdapter;
        let id = RuntimeId("fake".into());
        let mut stream = adapter.logs(&id);
        assert!(stream.next().await.is_none());
    }
}
