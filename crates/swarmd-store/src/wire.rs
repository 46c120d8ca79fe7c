//! The `state_sync` anti-entropy message shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swarmd_core::model::ClusterState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateSyncMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub state: ClusterState,
    pub timestamp: DateTime<Utc>,
    pub node_name: String,
}

impl StateSyncMessage {
    pub const TYPE: &'static str = "state_sync";

    pub fn new(state: ClusterState, node_name: String) -> Self {
        Self {
            message_type: Self::TYPE.to_string(),
            timestamp: Utc::now(),
            state,
            node_name,
        }
    }
}
