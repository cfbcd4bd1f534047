//! Server-side hooks for stream-mode connections.
//!
//! The multiplexing protocol itself is provided by the embedding application;
//! the handshake only hands it an authenticated transport and pumps accepted
//! sub-streams into the registered handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::transport::BoxTransport;

/// Called once per accepted sub-stream.
pub type StreamHandler = Arc<dyn Fn(BoxTransport) + Send + Sync>;

/// Server half of a multiplexed connection.
#[async_trait]
pub trait MuxSession: Send {
    /// Wait for the next sub-stream. `Ok(None)` means the session ended.
    async fn accept_sub_stream(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<BoxTransport>, RelayError>;

    /// Tear down the underlying transport once accepting has stopped.
    async fn close(&mut self) {}
}

/// Wraps an authenticated transport in a multiplexing server.
pub trait StreamMux: Send + Sync {
    fn server(&self, transport: BoxTransport) -> Box<dyn MuxSession>;
}
