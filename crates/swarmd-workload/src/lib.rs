//! Translates declared Deployment/Service/Ingress state into runtime
//! operations on the local node, driving the [`swarmd_scheduler`]
//! placement decision and the [`runtime::RuntimeAdapter`] collaborator.

pub mod manifest;
pub mod runtime;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use runtime::{ContainerSpec, RuntimeAdapter, RuntimeId};
use swarmd_core::error::Result;
use swarmd_core::model::{selector_matches, Deployment, Ingress, Pod, PodState, Service};
use swarmd_core::ClusterView;
use swarmd_registry::Registry;
use swarmd_store::Store;

/// Grace period given to a container before it is force-removed.
const STOP_GRACE: Duration = Duration::from_secs(10);

pub struct Workload {
    store: Arc<Store>,
    registry: Arc<Registry>,
    cluster: Arc<dyn ClusterView>,
    runtime: Arc<dyn RuntimeAdapter>,
    dns_ip: String,
}

impl Workload {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        cluster: Arc<dyn ClusterView>,
        runtime: Arc<dyn RuntimeAdapter>,
        dns_ip: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            cluster,
            runtime,
            dns_ip,
        })
    }

    /// Parse → store → for each desired replica: schedule, and only if
    /// the target is local, realize the container. A scheduling failure
    /// aborts the whole apply before anything is persisted; a runtime
    /// failure is recorded on the pod and the remaining replicas proceed.
    #[instrument(skip(self, deployment), fields(namespace = %deployment.namespace, name = %deployment.name))]
    pub async fn apply_deployment(&self, mut deployment: Deployment) -> Result<Deployment> {
        let members = self.cluster.members().await;
        let local_name = self.cluster.local_node().name;

        let mut pods = Vec::with_capacity(deployment.replicas_desired as usize);
        for index in 0..deployment.replicas_desired {
            let mut pod = synthesize_pod(&deployment.template, &deployment.namespace, &deployment.name, index);
            let target = swarmd_scheduler::schedule(&pod.node_selector, &members)?;
            pod.node_name = Some(target.name.clone());
            if target.name == local_name {
                self.realize_pod(&mut pod).await;
            }
            pods.push(pod);
        }

        deployment.pods = pods;
        self.store.save_deployment(deployment.clone()).await?;
        Ok(deployment)
    }

    /// Store → register an endpoint in the registry for every
    /// locally-known pod whose labels match the selector.
    pub async fn apply_service(&self, service: Service) -> Result<()> {
        self.store.save_service(service.clone()).await?;
        self.register_matching_local_pods(&service).await;
        Ok(())
    }

    /// Store and hand to the external Ingress proxy. The proxy itself is
    /// out of scope; only persistence and broadcast (via [`Store`]'s
    /// anti-entropy loop) happen here.
    pub async fn apply_ingress(&self, ingress: Ingress) -> Result<()> {
        self.store.save_ingress(ingress).await
    }

    /// For every pod of this Deployment scheduled locally, stop and
    /// remove its container, then delete the record. Idempotent: deleting
    /// an unknown deployment is not an error.
    pub async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = format!("{namespace}/{name}");
        if let Some(deployment) = self.store.get_deployment(&key).await {
            let local_name = self.cluster.local_node().name;
            for pod in &deployment.pods {
                if pod.node_name.as_deref() == Some(local_name.as_str()) {
                    self.teardown_pod(pod).await;
                }
            }
        }
        self.store.delete_deployment(&key).await
    }

    /// Deregister endpoints for every matching local pod, then delete the
    /// record.
    pub async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = format!("{namespace}/{name}");
        if let Some(service) = self.store.get_service(&key).await {
            self.deregister_matching_local_pods(&service).await;
        }
        self.store.delete_service(&key).await
    }

    /// Removes the Ingress from the store (the external proxy's rule set
    /// is out of scope here).
    pub async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = format!("{namespace}/{name}");
        self.store.delete_ingress(&key).await
    }

    /// Rebuilds local workloads from persisted state. Callers are
    /// expected to wait for membership to stabilize (~5s) before invoking
    /// this.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<()> {
        let members = self.cluster.members().await;
        let local_name = self.cluster.local_node().name;

        for mut deployment in self.store.list_deployments().await {
            let mut pods = Vec::with_capacity(deployment.replicas_desired as usize);
            for index in 0..deployment.replicas_desired {
                let mut pod =
                    synthesize_pod(&deployment.template, &deployment.namespace, &deployment.name, index);
                let target = match swarmd_scheduler::schedule(&pod.node_selector, &members) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!(deployment = %deployment.name, index, error = %e, "recovery scheduling failed for replica");
                        continue;
                    }
                };
                pod.node_name = Some(target.name.clone());
                if target.name == local_name {
                    self.realize_pod(&mut pod).await;
                }
                pods.push(pod);
            }
            deployment.pods = pods;
            self.store.save_deployment(deployment).await?;
        }

        for service in self.store.list_services().await {
            self.register_matching_local_pods(&service).await;
        }
        Ok(())
    }

    async fn register_matching_local_pods(&self, service: &Service) {
        let local_name = self.cluster.local_node().name;
        let port = service.ports.first().map(|p| p.target_port).unwrap_or(0);
        for pod in self.store.list_pods().await {
            if !self.pod_is_local_match(&pod, &service.namespace, &service.selector, &local_name) {
                continue;
            }
            let pod_id = pod.id.clone().unwrap_or_else(|| pod.name.clone());
            if let Err(e) = self
                .registry
                .register(&service.namespace, &service.name, &local_name, &pod_id, &pod.name, port)
                .await
            {
                warn!(pod = %pod.name, service = %service.name, error = %e, "failed to register endpoint");
            }
        }
    }

    async fn deregister_matching_local_pods(&self, service: &Service) {
        let local_name = self.cluster.local_node().name;
        for pod in self.store.list_pods().await {
            if !self.pod_is_local_match(&pod, &service.namespace, &service.selector, &local_name) {
                continue;
            }
            let pod_id = pod.id.clone().unwrap_or_else(|| pod.name.clone());
            let _ = self.registry.deregister(&service.namespace, &service.name, &pod_id).await;
        }
    }

    fn pod_is_local_match(
        &self,
        pod: &Pod,
        namespace: &str,
        selector: &swarmd_core::model::Labels,
        local_name: &str,
    ) -> bool {
        pod.namespace == namespace
            && pod.node_name.as_deref() == Some(local_name)
            && pod.state == PodState::Running
            && selector_matches(selector, &pod.labels)
    }

    async fn realize_pod(&self, pod: &mut Pod) {
        let spec = ContainerSpec {
            name: format!("{}-{}", pod.namespace, pod.name),
            image: pod.image.clone(),
            labels: pod.labels.clone(),
            ports: pod.ports.clone(),
            env: pod.env.clone(),
            volume_mounts: pod.volume_mounts.clone(),
            dns_ip: self.dns_ip.clone(),
        };
        match self.runtime.create(&spec).await {
            Ok(id) => match self.runtime.start(&id).await {
                Ok(()) => {
                    info!(pod = %pod.name, runtime_id = %id, "pod realized locally");
                    pod.id = Some(id.0);
                    pod.state = PodState::Running;
                }
                Err(e) => {
                    warn!(pod = %pod.name, error = %e, "failed to start container");
                    pod.id = Some(id.0);
                    pod.state = PodState::Failed;
                }
            },
            Err(e) => {
                warn!(pod = %pod.name, error = %e, "failed to create container");
                pod.state = PodState::Failed;
            }
        }
    }

    async fn teardown_pod(&self, pod: &Pod) {
        let Some(id) = &pod.id else { return };
        let runtime_id = RuntimeId(id.clone());
        if let Err(e) = self.runtime.stop(&runtime_id, STOP_GRACE).await {
            warn!(pod = %pod.name, error = %e, "failed to stop container, removing anyway");
        }
        if let Err(e) = self.runtime.remove(&runtime_id).await {
            warn!(pod = %pod.name, error = %e, "failed to remove container");
        }
    }
}

fn synthesize_pod(template: &Pod, namespace: &str, deployment_name: &str, index: u32) -> Pod {
    Pod {
        id: None,
        name: format!("{deployment_name}-{index}"),
        namespace: namespace.to_string(),
        node_name: None,
        image: template.image.clone(),
        labels: template.labels.clone(),
        annotations: template.annotations.clone(),
        ports: template.ports.clone(),
        env: template.env.clone(),
        volume_mounts: template.volume_mounts.clone(),
        node_selector: template.node_selector.clone(),
        state: PodState::Pending,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;
    use swarmd_core::model::{Labels, Node, NodeStatus, ServiceType};

    struct FakeTransport;
    #[async_trait]
    impl swarmd_core::Transport for FakeTransport {
        async fn broadcast(&self, _payload: Vec<u8>) {}
        fn local_address(&self) -> String {
            "10.0.0.1".into()
        }
    }

    struct FakeCluster {
        local: Node,
        members: Vec<Node>,
    }

    #[async_trait]
    impl ClusterView for FakeCluster {
        async fn members(&self) -> Vec<Node> {
            self.members.clone()
        }
        fn local_node(&self) -> Node {
            self.local.clone()
        }
    }

    fn node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            address: "10.0.0.1".into(),
            status: NodeStatus::Ready,
            labels: Labels::new(),
        }
    }

    fn single_node_cluster() -> Arc<FakeCluster> {
        Arc::new(FakeCluster {
            local: node("node-1"),
            members: vec![node("node-1")],
        })
    }

    struct LoggingAdapter;
    #[async_trait]
    impl RuntimeAdapter for LoggingAdapter {
        async fn create(&self, _spec: &ContainerSpec) -> Result<RuntimeId> {
            Ok(RuntimeId("fake-id".into()))
        }
        async fn start(&self, _id: &RuntimeId) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _id: &RuntimeId, _grace: Duration) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _id: &RuntimeId) -> Result<()> {
            Ok(())
        }
        async fn inspect(&self, _id: &RuntimeId) -> Result<PodState> {
            Ok(PodState::Running)
        }
        async fn pull(&self, _image: &str) -> Result<()> {
            Ok(())
        }
        fn logs(&self, _id: &RuntimeId) -> BoxStream<'static, Result<Bytes>> {
            Box::pin(futures::stream::empty())
        }
    }

    fn template() -> Pod {
        Pod {
            id: None,
            name: "web".into(),
            namespace: "default".into(),
            node_name: None,
            image: "nginx".into(),
            labels: Labels::from([("app".to_string(), "web".to_string())]),
            annotations: Labels::new(),
            ports: vec![],
            env: vec![],
            volume_mounts: vec![],
            node_selector: Labels::new(),
            state: PodState::Pending,
            created_at: Utc::now(),
        }
    }

    async fn fresh_workload(cluster: Arc<FakeCluster>) -> Arc<Workload> {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport);
        let store = Store::load(transport.clone(), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap();
        let registry = Registry::new(transport);
        Workload::new(store, registry, cluster, Arc::new(LoggingAdapter), "10.0.0.1".into())
    }

    #[tokio::test]
    async fn apply_deployment_realizes_every_local_replica() {
        let workload = fresh_workload(single_node_cluster()).await;
        let deployment = Deployment {
            namespace: "default".into(),
            name: "web".into(),
            replicas_desired: 3,
            template: template(),
            selector: Labels::from([("app".to_string(), "web".to_string())]),
            pods: vec![],
        };
        let applied = workload.apply_deployment(deployment).await.unwrap();
        assert_eq!(applied.pods.len(), 3);
        assert!(applied.pods.iter().all(|p| p.state == PodState::Running));
        assert!(applied.pods.iter().all(|p| p.id.is_some()));
        assert_eq!(applied.pods[0].name, "web-0");
    }

    #[tokio::test]
    async fn apply_deployment_with_unsatisfiable_selector_persists_nothing() {
        let workload = fresh_workload(single_node_cluster()).await;
        let mut deployment = Deployment {
            namespace: "default".into(),
            name: "web".into(),
            replicas_desired: 1,
            template: template(),
            selector: Labels::new(),
            pods: vec![],
        };
        deployment.template.node_selector = Labels::from([("tier".to_string(), "db".to_string())]);
        let err = workload.apply_deployment(deployment).await.unwrap_err();
        assert!(matches!(err, swarmd_core::Error::NoMatchingNode));
        assert!(workload.store.list_deployments().await.is_empty());
    }

    #[tokio::test]
    async fn apply_service_registers_matching_running_local_pods() {
        let workload = fresh_workload(single_node_cluster()).await;
        let mut pod = template();
        pod.name = "web-0".into();
        pod.id = Some("runtime-1".into());
        pod.node_name = Some("node-1".into());
        pod.state = PodState::Running;
        workload.store.save_pod(pod).await.unwrap();

        let service = Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: ServiceType::ClusterIp,
            selector: Labels::from([("app".to_string(), "web".to_string())]),
            ports: vec![swarmd_core::model::ServicePort {
                name: "http".into(),
                port: 80,
                target_port: 8080,
                protocol: swarmd_core::model::Protocol::Tcp,
            }],
        };
        workload.apply_service(service).await.unwrap();
        let addrs = workload.registry.get_addresses("default", "web").await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:8080".to_string()]);
    }

    #[tokio::test]
    async fn delete_deployment_tears_down_local_pods_and_removes_record() {
        let workload = fresh_workload(single_node_cluster()).await;
        let deployment = Deployment {
            namespace: "default".into(),
            name: "web".into(),
            replicas_desired: 1,
            template: template(),
            selector: Labels::new(),
            pods: vec![],
        };
        workload.apply_deployment(deployment).await.unwrap();
        assert!(workload.delete_deployment("default", "web").await.unwrap());
        assert!(workload.store.get_deployment("default/web").await.is_none());
        // Deleting again is idempotent, not an error.
        assert!(!workload.delete_deployment("default", "web").await.unwrap());
    }

    #[tokio::test]
    async fn recover_rebuilds_pods_from_persisted_deployments() {
        let cluster = single_node_cluster();
        let workload = fresh_workload(cluster.clone()).await;
        let deployment = Deployment {
            namespace: "default".into(),
            name: "web".into(),
            replicas_desired: 2,
            template: template(),
            selector: Labels::new(),
            pods: vec![],
        };
        workload.store.save_deployment(deployment).await.unwrap();

        workload.recover().await.unwrap();
        let recovered = workload.store.get_deployment("default/web").await.unwrap();
        assert_eq!(recovered.pods.len(), 2);
        assert!(recovered.pods.iter().all(|p| p.state == PodState::Running));
    }
}
