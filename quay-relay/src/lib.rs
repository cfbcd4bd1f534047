//! Connection handshake, duplex sessions and message routing for a Quay mesh.
//!
//! Nodes authenticate each other with an encrypted login frame, then either
//! exchange framed messages over a [`Session`] or hand the connection to a
//! stream multiplexer. Outbound traffic is routed directly inside a cluster and
//! through harbor nodes across clusters.

pub mod codec;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod mesh;
pub mod mux;
pub mod node;
pub mod router;
pub mod session;
pub mod transport;

pub use config::RelayConfig;
pub use error::RelayError;
pub use handshake::{dial, login, Accepted, Handshake};
pub use mesh::MeshNode;
pub use node::{Node, NodeRef, NodeRegistry};
pub use router::{Route, Router};
pub use session::{OutboundMessage, PacketReceiver, Session};
pub use transport::{BoxTransport, Transport};
