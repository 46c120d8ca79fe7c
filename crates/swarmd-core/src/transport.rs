//! The narrow capability surface Membership exposes to Registry and Store:
//! broadcast and local address lookup. Neither component is ever given a
//! reference to Membership's full API — just this trait object — so the
//! dependency only flows one way even though the three components
//! conceptually need each other.

use async_trait::async_trait;

use crate::model::Node;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort delivery to all live members. No retransmit guarantee.
    async fn broadcast(&self, payload: Vec<u8>);

    /// The local node's address, as Membership knows it.
    fn local_address(&self) -> String;
}

/// The narrow read-only view of the node roster the Scheduler and
/// Workload Control layers need. Kept separate from [`Transport`] for the
/// same reason: a capability boundary, not a reference to Membership's
/// full API.
#[async_trait]
pub trait ClusterView: Send + Sync {
    async fn members(&self) -> Vec<Node>;
    fn local_node(&self) -> Node;
}
