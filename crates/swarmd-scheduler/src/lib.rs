//! Node placement: intentionally trivial so richer policies can replace
//! it without touching the registry or store.

use rand::seq::IteratorRandom;
use tracing::debug;

use swarmd_core::error::{Error, Result};
use swarmd_core::model::{selector_matches, Labels, Node, NodeStatus};

/// Picks a target node for a pod whose declared `node_selector` is
/// `selector` out of the current `members` view.
///
/// - If `selector` is non-empty, returns the first `Ready` member whose
///   labels are a superset of it.
/// - Otherwise, returns a uniformly random `Ready` member.
///
/// No scoring, no resource accounting.
pub fn schedule(selector: &Labels, members: &[Node]) -> Result<Node> {
    let ready = members.iter().filter(|n| n.status == NodeStatus::Ready);

    if selector.is_empty() {
        let chosen = ready.choose(&mut rand::rng()).cloned();
        return chosen.ok_or(Error::NoMatchingNode);
    }

    for node in ready {
        if selector_matches(selector, &node.labels) {
            debug!(node = %node.name, "selected node by label selector");
            return Ok(node.clone());
        }
    }
    Err(Error::NoMatchingNode)
}
