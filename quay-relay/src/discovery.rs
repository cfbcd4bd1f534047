use quay_types::network::NodeInfo;

use crate::error::RelayError;

/// Receives every topology snapshot discovery produces.
pub type TopologyCallback = Box<dyn Fn(Vec<NodeInfo>) + Send + Sync>;

/// Source of cluster membership.
///
/// Implementations push a full snapshot through the callback on subscribe and
/// again whenever membership changes.
pub trait Discovery: Send + Sync {
    fn subscribe(&self, callback: TopologyCallback) -> Result<(), RelayError>;
}
