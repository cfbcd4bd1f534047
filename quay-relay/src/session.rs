//! Duplex session over one established connection.
//!
//! A [`Session`] owns its transport exclusively and drives it with two tasks:
//! a send worker draining an unbounded outbound queue, and a receive worker
//! pulling decoded packets through a [`PacketReceiver`]. The two only meet at
//! the queue, the cancellation tokens and the close-state CAS.
//!
//! On close the send worker still writes everything queued ahead of the
//! sentinel. A write that stays blocked past [`SESSION_CLOSE_GRACE`] is
//! abandoned.
//!
//! Close may be triggered by the owner, by the send worker (write or encode
//! failure) or by the receive worker (EOF, decode failure, or the packet
//! callback declining to continue, or panicking). Whoever wins the `open -> closing` CAS runs
//! cleanup; the close callback fires exactly once.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use quay_types::constants::SESSION_CLOSE_GRACE;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::transport::{BoxTransport, Transport};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A message that can be queued on a session.
pub trait OutboundMessage: Send + 'static {
    /// Encode to wire bytes. An empty result is skipped; an error closes the session.
    fn encode(&self) -> Result<Vec<u8>, RelayError>;
}

impl OutboundMessage for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, RelayError> {
        Ok(self.clone())
    }
}

/// Decodes inbound packets from the read half of a session's transport.
#[async_trait]
pub trait PacketReceiver: Send + 'static {
    type Packet: Send + 'static;

    /// Read the next packet. `Ok(None)` signals a clean end of stream.
    async fn recv(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Option<Self::Packet>, RelayError>;
}

type Outbound = Option<Box<dyn OutboundMessage>>;
type CloseCallback = Box<dyn FnOnce(&Session) + Send>;

#[derive(Default)]
struct Workers {
    started: bool,
    send: Option<JoinHandle<WriteHalf<BoxTransport>>>,
    recv: Option<JoinHandle<ReadHalf<BoxTransport>>>,
}

struct Inner {
    id: u64,
    state: AtomicU8,
    transport: Mutex<Option<BoxTransport>>,
    queue_tx: mpsc::UnboundedSender<Outbound>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    cancel: CancellationToken,
    write_abort: CancellationToken,
    workers: Mutex<Workers>,
    close_callback: Mutex<Option<CloseCallback>>,
    closed_tx: watch::Sender<bool>,
}

/// Cheaply cloneable handle to one live connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Take ownership of a connected transport. Nothing runs until [`Session::start`].
    pub fn new(transport: BoxTransport) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                state: AtomicU8::new(OPEN),
                transport: Mutex::new(Some(transport)),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                cancel: CancellationToken::new(),
                write_abort: CancellationToken::new(),
                workers: Mutex::new(Workers::default()),
                close_callback: Mutex::new(None),
                closed_tx,
            }),
        }
    }

    pub fn from_transport<T: Transport>(transport: T) -> Self {
        Self::new(Box::new(transport))
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != OPEN
    }

    /// Register the close notification, replacing any earlier one.
    pub fn set_close_callback<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        *lock(&self.inner.close_callback) = Some(Box::new(callback));
        self
    }

    /// Spawn the send and receive workers. Calling again is a no-op.
    ///
    /// `on_packet` sees every decoded packet; returning `false` ends the
    /// receive loop and closes the session.
    pub fn start<R, F>(&self, receiver: R, on_packet: F) -> &Self
    where
        R: PacketReceiver,
        F: Fn(&Session, R::Packet) -> bool + Send + Sync + 'static,
    {
        let mut workers = lock(&self.inner.workers);
        if workers.started || self.inner.state.load(Ordering::Acquire) != OPEN {
            return self;
        }
        let transport = lock(&self.inner.transport).take();
        let queue = lock(&self.inner.queue_rx).take();
        let (Some(transport), Some(queue)) = (transport, queue) else {
            return self;
        };
        workers.started = true;

        let (reader, writer) = tokio::io::split(transport);
        workers.send = Some(tokio::spawn(send_loop(self.clone(), queue, writer)));
        workers.recv = Some(tokio::spawn(recv_loop(
            self.clone(),
            reader,
            receiver,
            on_packet,
        )));
        debug!(session = self.id(), "session started");
        self
    }

    /// Queue a message. Fire-and-forget: after close it is silently dropped.
    pub fn send<M: OutboundMessage>(&self, msg: M) {
        self.send_boxed(Box::new(msg));
    }

    pub fn send_boxed(&self, msg: Box<dyn OutboundMessage>) {
        if self.is_closed() {
            return;
        }
        let _ = self.inner.queue_tx.send(Some(msg));
    }

    /// Close the session and wait until cleanup has finished, whichever
    /// trigger ended up running it.
    pub async fn close(&self) {
        if self.try_begin_close() {
            self.finish_close().await;
        } else {
            self.closed().await;
        }
    }

    /// Resolve once the session has reached the closed state.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn try_begin_close(&self) -> bool {
        self.inner
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by a worker whose loop ended. The worker cannot await its own
    /// handle, so cleanup runs on a separate task.
    fn close_from_worker(&self) {
        if self.try_begin_close() {
            // Runtime may already be gone when a worker is dropped at shutdown.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let session = self.clone();
                handle.spawn(async move { session.finish_close().await });
            }
        }
    }

    async fn finish_close(&self) {
        self.inner.cancel.cancel();
        let _ = self.inner.queue_tx.send(None);

        let (send, recv) = {
            let mut workers = lock(&self.inner.workers);
            (workers.send.take(), workers.recv.take())
        };
        let writer = match send {
            Some(mut handle) => {
                let joined = match tokio::time::timeout(SESSION_CLOSE_GRACE, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        debug!(session = self.id(), "abandoning stalled write");
                        self.inner.write_abort.cancel();
                        handle.await
                    }
                };
                self.joined(joined, "send")
            }
            None => None,
        };
        let reader = match recv {
            Some(handle) => {
                let joined = handle.await;
                self.joined(joined, "receive")
            }
            None => None,
        };

        let transport = match (reader, writer) {
            (Some(reader), Some(writer)) => Some(reader.unsplit(writer)),
            _ => lock(&self.inner.transport).take(),
        };
        if let Some(mut transport) = transport {
            let _ = transport.shutdown().await;
        }

        self.inner.state.store(CLOSED, Ordering::Release);
        debug!(session = self.id(), "session closed");

        let callback = lock(&self.inner.close_callback).take();
        if let Some(callback) = callback {
            callback(self);
        }
        self.inner.closed_tx.send_replace(true);
    }

    fn joined<T>(&self, result: Result<T, JoinError>, worker: &'static str) -> Option<T> {
        match result {
            Ok(half) => Some(half),
            Err(e) => {
                if e.is_panic() {
                    warn!(session = self.id(), worker, "session worker panicked");
                }
                None
            }
        }
    }
}

/// Runs the shared close path when a worker exits, by return or by panic.
struct CloseOnExit<'a>(&'a Session);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close_from_worker();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

async fn send_loop(
    session: Session,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    mut writer: WriteHalf<BoxTransport>,
) -> WriteHalf<BoxTransport> {
    let _close = CloseOnExit(&session);
    let abort = session.inner.write_abort.clone();
    while let Some(Some(msg)) = queue.recv().await {
        let data = match msg.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(session = session.id(), error = %e, "failed to encode outbound message");
                break;
            }
        };
        if data.is_empty() {
            continue;
        }
        let written = tokio::select! {
            biased;
            r = writer.write_all(&data) => r,
            _ = abort.cancelled() => break,
        };
        if let Err(e) = written {
            debug!(session = session.id(), error = %e, "session write failed");
            break;
        }
    }
    writer
}

async fn recv_loop<R, F>(
    session: Session,
    mut reader: ReadHalf<BoxTransport>,
    mut receiver: R,
    on_packet: F,
) -> ReadHalf<BoxTransport>
where
    R: PacketReceiver,
    F: Fn(&Session, R::Packet) -> bool + Send + Sync + 'static,
{
    let _close = CloseOnExit(&session);
    let cancel = session.inner.cancel.clone();
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            r = receiver.recv(&mut reader) => r,
        };
        match packet {
            Ok(Some(packet)) => {
                if !on_packet(&session, packet) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(session = session.id(), error = %e, "session read failed");
                break;
            }
        }
    }
    reader
}
