//! Shared fakes for the relay integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quay_relay::discovery::{Discovery, TopologyCallback};
use quay_relay::node::SendResultCallback;
use quay_relay::{BoxTransport, Node, NodeRef, NodeRegistry, PacketReceiver, RelayError, Session};
use quay_types::addr::{Addr, LogicAddr};
use quay_types::network::{Envelope, NodeInfo};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub const SECRET: &[u8] = b"integration-secret";

/// Helper: route test logs through the libtest capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(s: &str) -> LogicAddr {
    s.parse().unwrap()
}

pub fn node_info(logic: &str, net: &str) -> NodeInfo {
    NodeInfo {
        logic_addr: addr(logic),
        net_addr: net.to_string(),
        export: false,
        available: true,
    }
}

/// Each read becomes one packet.
pub struct ChunkReceiver;

#[async_trait]
impl PacketReceiver for ChunkReceiver {
    type Packet = Vec<u8>;

    async fn recv(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Option<Vec<u8>>, RelayError> {
        let mut buf = vec![0u8; 1024];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// Inbound bytes observed by fake nodes, tagged with the node they arrived on.
pub type Inbound = mpsc::UnboundedReceiver<(LogicAddr, Vec<u8>)>;

pub struct FakeNode {
    addr: Addr,
    accepts: AtomicBool,
    session: Mutex<Option<Session>>,
    sent: Mutex<Vec<(Envelope, Instant)>>,
    inbound: mpsc::UnboundedSender<(LogicAddr, Vec<u8>)>,
}

impl FakeNode {
    pub fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(Envelope, Instant)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Node for FakeNode {
    fn addr(&self) -> &Addr {
        &self.addr
    }

    fn accepts_new_connection(&self) -> bool {
        self.accepts.load(Ordering::SeqCst)
    }

    fn establish(&self, transport: BoxTransport) {
        let peer = self.addr.logic_addr();
        let inbound = self.inbound.clone();
        let session = Session::new(transport);
        session.start(ChunkReceiver, move |_, packet| {
            let _ = inbound.send((peer, packet));
            true
        });
        *self.session.lock().unwrap() = Some(session);
    }

    async fn open_stream(&self) -> Result<BoxTransport, RelayError> {
        Err(RelayError::ConnectionError {
            reason: format!("no multiplexer for {}", self.addr.logic_addr()),
        })
    }

    fn send_message(
        &self,
        envelope: Envelope,
        deadline: Instant,
        on_result: Option<SendResultCallback>,
    ) {
        self.sent.lock().unwrap().push((envelope, deadline));
        if let Some(cb) = on_result {
            cb(Ok(()));
        }
    }
}

/// Registry filled from discovery snapshots. Type-255 nodes double as the
/// harbor of their cluster.
pub struct FakeRegistry {
    nodes: Mutex<HashMap<LogicAddr, Arc<FakeNode>>>,
    inbound_tx: mpsc::UnboundedSender<(LogicAddr, Vec<u8>)>,
    inbound_rx: Mutex<Option<Inbound>>,
    ready: watch::Sender<bool>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready, _) = watch::channel(false);
        Self {
            nodes: Mutex::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            ready,
        }
    }

    /// Helper: a registry already holding `nodes`, as (logic, net) pairs.
    pub fn with_nodes(nodes: &[(&str, &str)]) -> Self {
        let registry = Self::new();
        registry.on_topology_update(nodes.iter().map(|(l, n)| node_info(l, n)).collect());
        registry
    }

    /// Make `logic` refuse inbound message-mode connections from now on.
    pub fn refuse(&self, logic: &str) {
        if let Some(node) = self.node(logic) {
            node.accepts.store(false, Ordering::SeqCst);
        }
    }

    pub fn node(&self, logic: &str) -> Option<Arc<FakeNode>> {
        self.nodes.lock().unwrap().get(&addr(logic)).cloned()
    }

    pub fn take_inbound(&self) -> Inbound {
        self.inbound_rx.lock().unwrap().take().unwrap()
    }

    fn insert(&self, info: NodeInfo) {
        let node = Arc::new(FakeNode {
            addr: Addr::new(info.logic_addr, info.net_addr),
            accepts: AtomicBool::new(true),
            session: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            inbound: self.inbound_tx.clone(),
        });
        self.nodes.lock().unwrap().insert(info.logic_addr, node);
    }
}

#[async_trait]
impl NodeRegistry for FakeRegistry {
    fn lookup_by_logic_addr(&self, addr: LogicAddr) -> Option<NodeRef> {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr)
            .map(|n| n.clone() as NodeRef)
    }

    fn lookup_harbor_for_cluster(&self, cluster: u32, _hint: LogicAddr) -> Option<NodeRef> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .find(|n| {
                let a = n.addr.logic_addr();
                a.is_harbor() && a.cluster() == cluster
            })
            .map(|n| n.clone() as NodeRef)
    }

    fn lookup_by_type(&self, node_type: u32, index: usize) -> Option<NodeRef> {
        let nodes = self.nodes.lock().unwrap();
        let mut matching: Vec<_> = nodes
            .values()
            .filter(|n| n.addr.logic_addr().node_type() == node_type)
            .collect();
        matching.sort_by_key(|n| n.addr.logic_addr().as_u32());
        matching.get(index).map(|&n| n.clone() as NodeRef)
    }

    fn on_topology_update(&self, nodes: Vec<NodeInfo>) {
        for info in nodes.into_iter().filter(|n| n.available) {
            self.insert(info);
        }
        self.ready.send_replace(true);
    }

    async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Discovery that pushes one fixed snapshot on subscribe.
pub struct StaticDiscovery(pub Vec<NodeInfo>);

impl Discovery for StaticDiscovery {
    fn subscribe(&self, callback: TopologyCallback) -> Result<(), RelayError> {
        callback(self.0.clone());
        Ok(())
    }
}

/// Discovery that never reports anything.
pub struct SilentDiscovery;

impl Discovery for SilentDiscovery {
    fn subscribe(&self, _callback: TopologyCallback) -> Result<(), RelayError> {
        Ok(())
    }
}
