use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use quay_crypto::Cipher;
use quay_types::addr::{Addr, LogicAddr};
use quay_types::network::Envelope;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::discovery::Discovery;
use crate::dispatch::MessageRegistry;
use crate::error::RelayError;
use crate::handshake::Handshake;
use crate::mux::{StreamHandler, StreamMux};
use crate::node::NodeRegistry;
use crate::router::Router;
use crate::transport::BoxTransport;

/// A node's view of the mesh: accepts inbound peers, routes outbound traffic.
pub struct MeshNode {
    config: RelayConfig,
    local: Addr,
    registry: Arc<dyn NodeRegistry>,
    router: Router,
    cipher: Arc<Cipher>,
    messages: MessageRegistry,
    shutdown: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl MeshNode {
    pub fn new(config: RelayConfig, registry: Arc<dyn NodeRegistry>) -> Result<Self, RelayError> {
        let local = Addr::parse(&config.logic_addr, config.net_addr.clone())?;
        let router = Router::new(local.logic_addr(), Arc::clone(&registry));
        let cipher = Arc::new(Cipher::new(config.secret.as_bytes()));

        Ok(Self {
            config,
            local,
            registry,
            router,
            cipher,
            messages: MessageRegistry::new(),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            listen_addr: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn logic_addr(&self) -> LogicAddr {
        self.local.logic_addr()
    }

    /// Socket address the accept loop is bound to, once started.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self
            .listen_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Join the mesh: subscribe to discovery, wait for the first topology,
    /// then listen on our network address. Only the first call does anything.
    ///
    /// Pass a multiplexer and handler to accept stream-mode connections.
    pub async fn start(
        &self,
        discovery: &dyn Discovery,
        streams: Option<(Arc<dyn StreamMux>, StreamHandler)>,
    ) -> Result<(), RelayError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::AlreadyStarted);
        }

        let registry = Arc::clone(&self.registry);
        discovery.subscribe(Box::new(move |nodes| registry.on_topology_update(nodes)))?;

        tokio::select! {
            _ = self.shutdown.cancelled() => return Err(RelayError::Cancelled),
            _ = self.registry.wait_ready() => {}
        }

        let local = self.logic_addr();
        if self.registry.lookup_by_logic_addr(local).is_none() {
            return Err(RelayError::ConfigError {
                reason: format!("{} not in cluster config", local),
            });
        }

        let net_addr = self.local.net_addr();
        let listener = TcpListener::bind(&net_addr)
            .await
            .map_err(|e| RelayError::ConnectionError {
                reason: format!("bind {}: {}", net_addr, e),
            })?;
        let bound = listener.local_addr()?;
        *self
            .listen_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(bound);

        let mut handshake = Handshake::new(
            Arc::clone(&self.cipher),
            Arc::clone(&self.registry),
            self.shutdown.clone(),
        )
        .with_timeout(self.config.handshake_timeout())
        .with_max_frame(self.config.max_login_frame);
        if let Some((mux, handler)) = streams {
            handshake = handshake.with_stream_handler(mux, handler);
        }

        info!(logic_addr = %local, listen = %bound, "mesh node started");
        tokio::spawn(accept_loop(listener, Arc::new(handshake), self.shutdown.clone()));
        Ok(())
    }

    /// Stop accepting and abort in-flight handshakes. Idempotent.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(logic_addr = %self.logic_addr(), "mesh node stopping");
            self.shutdown.cancel();
        }
    }

    /// Resolve once [`MeshNode::stop`] has been called.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }

    /// Logical address of the `index`-th node of `node_type`.
    pub fn addr_by_type(&self, node_type: u32, index: usize) -> Option<LogicAddr> {
        self.registry
            .lookup_by_type(node_type, index)
            .map(|node| node.addr().logic_addr())
    }

    /// Open a multiplexed stream directly to `to`.
    pub async fn open_stream(&self, to: LogicAddr) -> Result<BoxTransport, RelayError> {
        if to == self.logic_addr() {
            return Err(RelayError::RoutingError {
                target: format!("{} (cannot open stream to self)", to),
            });
        }
        let node = self
            .registry
            .lookup_by_logic_addr(to)
            .ok_or_else(|| RelayError::RoutingError {
                target: to.to_string(),
            })?;
        node.open_stream().await
    }

    /// Send a one-way message. Routing failures surface here; delivery is
    /// fire-and-forget. Messages to ourselves are dispatched locally.
    pub fn send_message(
        &self,
        to: LogicAddr,
        kind: u16,
        payload: Vec<u8>,
    ) -> Result<(), RelayError> {
        let envelope = Envelope {
            kind,
            from: self.logic_addr(),
            to,
            payload,
        };
        if to == self.logic_addr() {
            self.messages.dispatch(&envelope);
            return Ok(());
        }

        let node = self.router.route(to)?;
        let deadline = Instant::now() + self.config.send_timeout();
        node.send_message(envelope, deadline, None);
        Ok(())
    }

    pub fn register_message<F>(&self, kind: u16, handler: F)
    where
        F: Fn(LogicAddr, &[u8]) + Send + Sync + 'static,
    {
        self.messages.register(kind, handler);
    }

    /// Hand an inbound envelope to its registered handler.
    pub fn dispatch_message(&self, envelope: &Envelope) -> bool {
        self.messages.dispatch(envelope)
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handshake: Arc<Handshake>,
    shutdown: CancellationToken,
) {
    loop {
        let (conn, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "accept failed, stopping accept loop");
                    break;
                }
            },
        };
        debug!(%peer, "new connection");

        let handshake = Arc::clone(&handshake);
        tokio::spawn(async move {
            match handshake.accept(conn).await {
                Ok(accepted) => info!(%peer, ?accepted, "handshake complete"),
                Err(e) => warn!(%peer, kind = e.kind(), error = %e, "handshake rejected"),
            }
        });
    }
    info!("accept loop stopped");
}
