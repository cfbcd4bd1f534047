//! Shared type definitions for the quay cluster mesh.
//!
//! Every node in a quay cluster is named by a 32-bit [`LogicAddr`] packing a
//! cluster id, a node type and a server index. [`Addr`] pairs that immutable
//! identity with the mutable network location discovery reports for it.

pub mod addr;
pub mod constants;
pub mod error;
pub mod network;

pub use addr::{Addr, LogicAddr};
pub use error::QuayError;
