//! The plaintext wire envelope exchanged between membership layers, sealed
//! with [`crate::crypto::seal`] before it ever touches a socket. `App`
//! carries the orchestration glue's own envelope (`service_update` /
//! `state_sync`) opaquely — membership never parses it, it just hands the
//! bytes to the single registered message handler.

use serde::{Deserialize, Serialize};

use swarmd_core::model::Node;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireMessage {
    Ping { from: Node },
    Ack { from: Node },
    PingReq { target: Node, from: Node },
    Join { node: Node, token: String },
    JoinAck { accepted: bool, members: Vec<Node> },
    Leave { node: String },
    Announce { node: Node },
    App { payload: Vec<u8> },
}
