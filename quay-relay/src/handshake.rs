//! Inbound connection handshake and its outbound counterpart.
//!
//! Wire exchange, before any session framing:
//!
//! ```text
//! client -> server   [4-byte BE length][encrypted LoginRequest]
//! server -> client   [0, 0, 0, 0]            on success
//!                    connection closed       on any failure
//! ```
//!
//! Every step of the inbound side shares one deadline and is also aborted by
//! process shutdown. A failed handshake is never retried here: the transport
//! is closed and the error returned to the accept loop.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use quay_crypto::Cipher;
use quay_types::addr::LogicAddr;
use quay_types::constants::{HANDSHAKE_ACK, HANDSHAKE_TIMEOUT, MAX_LOGIN_FRAME_SIZE};
use quay_types::network::LoginRequest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec;
use crate::error::RelayError;
use crate::mux::{MuxSession, StreamHandler, StreamMux};
use crate::node::{NodeRef, NodeRegistry};
use crate::transport::Transport;

/// Result of a successful inbound handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The transport was handed to the peer's node record as its session.
    Message { peer: LogicAddr },
    /// The transport is now served by the stream multiplexer.
    Stream { peer: LogicAddr },
}

struct StreamAcceptor {
    mux: Arc<dyn StreamMux>,
    handler: StreamHandler,
}

/// Authenticates and classifies inbound connections.
pub struct Handshake {
    cipher: Arc<Cipher>,
    registry: Arc<dyn NodeRegistry>,
    stream: Option<StreamAcceptor>,
    timeout: Duration,
    max_frame: usize,
    shutdown: CancellationToken,
}

impl Handshake {
    pub fn new(
        cipher: Arc<Cipher>,
        registry: Arc<dyn NodeRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cipher,
            registry,
            stream: None,
            timeout: HANDSHAKE_TIMEOUT,
            max_frame: MAX_LOGIN_FRAME_SIZE,
            shutdown,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Enable stream-mode connections. Without this, stream logins are rejected.
    pub fn with_stream_handler(mut self, mux: Arc<dyn StreamMux>, handler: StreamHandler) -> Self {
        self.stream = Some(StreamAcceptor { mux, handler });
        self
    }

    /// Run the handshake on a freshly accepted connection.
    ///
    /// On success the transport has been handed off; on failure it has been
    /// closed without writing anything back.
    pub async fn accept<T: Transport>(&self, mut conn: T) -> Result<Accepted, RelayError> {
        let cancel = self.shutdown.child_token();
        let deadline = Instant::now() + self.timeout;

        let (node, login) = match self.authenticate(&mut conn, deadline, &cancel).await {
            Ok(v) => v,
            Err(e) => return Err(abort(conn, e).await),
        };
        let peer = node.addr().logic_addr();

        if login.is_stream {
            let Some(stream) = &self.stream else {
                return Err(abort(
                    conn,
                    RelayError::ModeRejected {
                        reason: format!("stream login from {} with no stream handler", peer),
                    },
                )
                .await);
            };
            if let Err(e) = write_ack(&mut conn, deadline, &cancel).await {
                return Err(abort(conn, e).await);
            }

            let mux = stream.mux.server(Box::new(conn));
            tokio::spawn(serve_sub_streams(
                mux,
                Arc::clone(&stream.handler),
                self.shutdown.clone(),
                peer,
            ));
            Ok(Accepted::Stream { peer })
        } else {
            if !node.accepts_new_connection() {
                return Err(abort(
                    conn,
                    RelayError::ModeRejected {
                        reason: format!("node {} refused a new connection", peer),
                    },
                )
                .await);
            }
            if let Err(e) = write_ack(&mut conn, deadline, &cancel).await {
                return Err(abort(conn, e).await);
            }

            node.establish(Box::new(conn));
            Ok(Accepted::Message { peer })
        }
    }

    async fn authenticate<T: Transport>(
        &self,
        conn: &mut T,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(NodeRef, LoginRequest), RelayError> {
        let len = step(
            deadline,
            cancel,
            "read length prefix",
            codec::read_length_prefix(conn, self.max_frame),
        )
        .await?;
        let payload = step(
            deadline,
            cancel,
            "read login frame",
            codec::read_frame_body(conn, len),
        )
        .await?;

        let login = codec::decode_login_payload(&self.cipher, &payload)?;
        let claimed = login.logic_addr()?;

        let node = self
            .registry
            .lookup_by_logic_addr(claimed)
            .ok_or_else(|| RelayError::AuthError {
                reason: format!("unknown node {}", claimed),
            })?;

        let registered = node.addr().net_addr();
        if registered != login.net_addr {
            return Err(RelayError::AuthError {
                reason: format!(
                    "net addr mismatch for {}: claimed {}, registered {}",
                    claimed, login.net_addr, registered
                ),
            });
        }
        Ok((node, login))
    }
}

/// Run one handshake step under the shared deadline and the shutdown signal.
async fn step<F, T, E>(
    deadline: Instant,
    cancel: &CancellationToken,
    stage: &'static str,
    fut: F,
) -> Result<T, RelayError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<RelayError>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        r = tokio::time::timeout_at(deadline, fut) => match r {
            Ok(inner) => inner.map_err(Into::into),
            Err(_) => Err(RelayError::Timeout { stage }),
        },
    }
}

async fn write_ack<T: Transport>(
    conn: &mut T,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    step(deadline, cancel, "write ack", async {
        conn.write_all(&HANDSHAKE_ACK).await?;
        conn.flush().await
    })
    .await
}

async fn abort<T: Transport>(mut conn: T, err: RelayError) -> RelayError {
    let _ = conn.shutdown().await;
    err
}

async fn serve_sub_streams(
    mut mux: Box<dyn MuxSession>,
    handler: StreamHandler,
    shutdown: CancellationToken,
    peer: LogicAddr,
) {
    loop {
        match mux.accept_sub_stream(&shutdown).await {
            Ok(Some(stream)) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(stream))).is_err() {
                    warn!(%peer, "stream handler panicked");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%peer, error = %e, "stream accept failed");
                break;
            }
        }
    }
    mux.close().await;
    debug!(%peer, "stream-mode connection closed");
}

/// Perform the client side of the handshake on an already connected transport.
///
/// A peer that closes without acknowledging rejected the login.
pub async fn login<T: Transport>(
    conn: &mut T,
    cipher: &Cipher,
    req: &LoginRequest,
    timeout: Duration,
) -> Result<(), RelayError> {
    let frame = codec::encode_login_frame(cipher, req)?;
    let exchange = async {
        conn.write_all(&frame).await?;
        conn.flush().await?;

        let mut ack = [0u8; 4];
        if let Err(e) = conn.read_exact(&mut ack).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RelayError::AuthError {
                    reason: "peer closed the connection during login".to_string(),
                }
            } else {
                RelayError::Io(e)
            });
        }
        if ack != HANDSHAKE_ACK {
            return Err(RelayError::FrameError {
                reason: format!("unexpected login ack {:?}", ack),
            });
        }
        Ok::<(), RelayError>(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| RelayError::Timeout { stage: "login" })?
}

/// Connect to `net_addr` over TCP and log in.
pub async fn dial(
    net_addr: &str,
    cipher: &Cipher,
    req: &LoginRequest,
    timeout: Duration,
) -> Result<TcpStream, RelayError> {
    let mut conn = tokio::time::timeout(timeout, TcpStream::connect(net_addr))
        .await
        .map_err(|_| RelayError::Timeout { stage: "connect" })?
        .map_err(|e| RelayError::ConnectionError {
            reason: format!("connect {}: {}", net_addr, e),
        })?;
    login(&mut conn, cipher, req, timeout).await?;
    Ok(conn)
}
