//! Single in-process message handler: decode one envelope, match on its
//! `type` tag, route to Registry or Store. Unknown types are dropped
//! with a log line.

use serde::Deserialize;
use tracing::debug;

use swarmd_registry::Registry;
use swarmd_store::Store;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

pub async fn dispatch(registry: &Registry, store: &Store, bytes: &[u8]) {
    let envelope: Envelope = match serde_json::from_slice(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "dropped app message with unparseable envelope");
            return;
        }
    };
    match envelope.kind.as_str() {
        "service_update" => registry.handle_update(bytes).await,
        "state_sync" => store.handle_state_sync(bytes).await,
        other => debug!(kind = %other, "dropped app message of unrecognized type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use swarmd_core::Transport;

    struct FakeTransport;
    #[async_trait]
    impl Transport for FakeTransport {
        async fn broadcast(&self, _payload: Vec<u8>) {}
        fn local_address(&self) -> String {
            "10.0.0.1".into()
        }
    }

    #[tokio::test]
    async fn unknown_type_is_dropped_without_panicking() {
        let registry = Registry::new(Arc::new(FakeTransport));
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(Arc::new(FakeTransport), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap();
        dispatch(&registry, &store, br#"{"type":"mystery"}"#).await;
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_panicking() {
        let registry = Registry::new(Arc::new(FakeTransport));
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(Arc::new(FakeTransport), "node-1".into(), dir.path().to_path_buf())
            .await
            .unwrap();
        dispatch(&registry, &store, b"not json").await;
    }
}
