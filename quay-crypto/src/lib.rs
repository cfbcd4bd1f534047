//! Cryptographic primitives for the quay cluster mesh.
//!
//! Only the handshake login payload is encrypted here; post-handshake traffic
//! is the transport's concern.

pub mod cipher;

pub use cipher::Cipher;
