//! The `service_update` gossip message shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateAction {
    Register,
    Deregister,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpdateMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub action: UpdateAction,
    pub service_name: String,
    pub namespace: String,
    #[serde(rename = "podID")]
    pub pod_id: String,
    pub pod_name: String,
    pub node_name: String,
    pub address: String,
    pub port: u16,
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
}

impl ServiceUpdateMessage {
    pub const TYPE: &'static str = "service_update";

    pub fn new(action: UpdateAction, namespace: &str, service_name: &str) -> Self {
        Self {
            message_type: Self::TYPE.to_string(),
            action,
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
            pod_id: String::new(),
            pod_name: String::new(),
            node_name: String::new(),
            address: String::new(),
            port: 0,
            healthy: true,
            timestamp: Utc::now(),
        }
    }
}
