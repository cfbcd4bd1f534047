//! Interfaces to the node registry and the node records it hands out.
//!
//! Registry storage and update policy live outside this crate; the relay
//! only performs read-mostly lookups through [`NodeRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use quay_types::addr::{Addr, LogicAddr};
use quay_types::network::{Envelope, NodeInfo};
use tokio::time::Instant;

use crate::error::RelayError;
use crate::transport::BoxTransport;

/// Shared handle to a registered node.
pub type NodeRef = Arc<dyn Node>;

/// Invoked once with the outcome of a [`Node::send_message`] call.
pub type SendResultCallback = Box<dyn FnOnce(Result<(), RelayError>) + Send>;

/// A remote node as known to the local registry.
#[async_trait]
pub trait Node: Send + Sync {
    fn addr(&self) -> &Addr;

    /// Conflict check for an inbound message-mode connection, e.g. `false`
    /// when a session to this node is already up.
    fn accepts_new_connection(&self) -> bool;

    /// Adopt an authenticated inbound transport as this node's active session.
    fn establish(&self, transport: BoxTransport);

    /// Open a multiplexed stream to this node.
    async fn open_stream(&self) -> Result<BoxTransport, RelayError>;

    /// Queue an envelope for delivery before `deadline`.
    fn send_message(
        &self,
        envelope: Envelope,
        deadline: Instant,
        on_result: Option<SendResultCallback>,
    );
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    fn lookup_by_logic_addr(&self, addr: LogicAddr) -> Option<NodeRef>;

    /// Harbor serving `cluster`; `hint` is the final destination, letting the
    /// registry spread load across several harbors.
    fn lookup_harbor_for_cluster(&self, cluster: u32, hint: LogicAddr) -> Option<NodeRef>;

    /// The `index`-th node of the given type in the local cluster.
    fn lookup_by_type(&self, node_type: u32, index: usize) -> Option<NodeRef>;

    /// Apply a topology snapshot from discovery.
    fn on_topology_update(&self, nodes: Vec<NodeInfo>);

    /// Resolve once the first topology snapshot has been applied.
    async fn wait_ready(&self);
}
