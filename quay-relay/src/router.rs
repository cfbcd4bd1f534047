use std::sync::Arc;

use quay_types::addr::LogicAddr;
use tracing::debug;

use crate::error::RelayError;
use crate::node::{NodeRef, NodeRegistry};

/// How an outbound message reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Same cluster: talk to the destination itself.
    Direct,
    /// We are a harbor: hand off to the harbor serving the destination's cluster.
    RemoteHarbor { cluster: u32 },
    /// We are not a harbor: hand off to our own cluster's harbor.
    LocalHarbor { cluster: u32 },
}

/// Resolves destination addresses to the node that should carry the traffic.
///
/// Lookups are pure reads against the registry; no I/O happens here.
pub struct Router {
    local: LogicAddr,
    registry: Arc<dyn NodeRegistry>,
}

impl Router {
    pub fn new(local: LogicAddr, registry: Arc<dyn NodeRegistry>) -> Self {
        Self { local, registry }
    }

    pub fn local(&self) -> LogicAddr {
        self.local
    }

    /// Decide the route to `to` without touching the registry.
    pub fn route_for(&self, to: LogicAddr) -> Route {
        if to.cluster() == self.local.cluster() {
            Route::Direct
        } else if self.local.is_harbor() {
            Route::RemoteHarbor {
                cluster: to.cluster(),
            }
        } else {
            Route::LocalHarbor {
                cluster: self.local.cluster(),
            }
        }
    }

    /// Find the node to send to for destination `to`.
    pub fn route(&self, to: LogicAddr) -> Result<NodeRef, RelayError> {
        let route = self.route_for(to);
        let node = match route {
            Route::Direct => self.registry.lookup_by_logic_addr(to),
            Route::RemoteHarbor { cluster } | Route::LocalHarbor { cluster } => {
                self.registry.lookup_harbor_for_cluster(cluster, to)
            }
        };
        node.ok_or_else(|| {
            debug!(target_addr = %to, ?route, "no route to target");
            RelayError::RoutingError {
                target: to.to_string(),
            }
        })
    }
}
