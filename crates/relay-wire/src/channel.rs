//! Channel endpoints: in-memory duplex pipes.
//!
//! [`pipe`] creates two connected [`Endpoint`]s. Each end can send byte
//! payloads to the other, and a payload may carry further endpoints, which
//! is how capabilities travel between applications. Delivery on one pipe is
//! FIFO. Closing either end closes the pipe: the peer's `recv` drains what
//! was already queued and then yields `None`, and further sends fail.
//! Dropping an end without closing it has the same effect on the peer.

use crate::message::WireError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, orderable identity of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// A unit of transfer: opaque bytes plus transferred endpoints.
#[derive(Debug)]
pub struct Message {
    /// Encoded payload.
    pub payload: Vec<u8>,
    /// Endpoints transferred with this message, in order.
    pub endpoints: Vec<Endpoint>,
}

impl Message {
    /// A message without transferred endpoints.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            endpoints: Vec::new(),
        }
    }

    /// A message carrying `endpoints`.
    pub fn with_endpoints(payload: Vec<u8>, endpoints: Vec<Endpoint>) -> Self {
        Self { payload, endpoints }
    }
}

/// State shared by both ends of one pipe.
#[derive(Debug)]
struct PipeState {
    closed: watch::Sender<bool>,
}

impl PipeState {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }
}

/// Create a connected pair of endpoints.
pub fn pipe() -> (Endpoint, Endpoint) {
    let (closed, _) = watch::channel(false);
    let state = Arc::new(PipeState { closed });
    let (tx_a, rx_b) = mpsc::unbounded_channel();
    let (tx_b, rx_a) = mpsc::unbounded_channel();
    let a = Endpoint::new(tx_a, rx_a, Arc::clone(&state));
    let b = Endpoint::new(tx_b, rx_b, state);
    debug!(a = %a.id(), b = %b.id(), "Created pipe");
    (a, b)
}

/// One end of a pipe.
#[derive(Debug)]
pub struct Endpoint {
    sender: EndpointSender,
    receiver: EndpointReceiver,
}

impl Endpoint {
    fn new(
        tx: mpsc::UnboundedSender<Message>,
        rx: mpsc::UnboundedReceiver<Message>,
        pipe: Arc<PipeState>,
    ) -> Self {
        let id = HandleId::next();
        let local_closed = Arc::new(AtomicBool::new(false));
        Self {
            sender: EndpointSender {
                id,
                tx,
                pipe: Arc::clone(&pipe),
                local_closed: Arc::clone(&local_closed),
            },
            receiver: EndpointReceiver {
                id,
                rx,
                pipe,
                local_closed,
            },
        }
    }

    /// Identity of this end.
    pub fn id(&self) -> HandleId {
        self.sender.id
    }

    /// Send a message to the peer.
    pub fn send(&self, message: Message) -> Result<(), WireError> {
        self.sender.send(message)
    }

    /// Receive the next message, or `None` once the pipe is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Close the pipe. Idempotent.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Whether the pipe has been closed by either end.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Split into a clonable sending half and the receiving half.
    pub fn split(self) -> (EndpointSender, EndpointReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of an endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EndpointSender {
    id: HandleId,
    tx: mpsc::UnboundedSender<Message>,
    pipe: Arc<PipeState>,
    local_closed: Arc<AtomicBool>,
}

impl EndpointSender {
    /// Identity of the endpoint this half belongs to.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Send a message to the peer.
    pub fn send(&self, message: Message) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        self.tx.send(message).map_err(|_| {
            self.pipe.close();
            WireError::ConnectionClosed
        })
    }

    /// Close the pipe. Idempotent.
    pub fn close(&self) {
        self.local_closed.store(true, Ordering::SeqCst);
        if self.pipe.close() {
            debug!(endpoint = %self.id, "Closed pipe");
        }
    }

    /// Whether the pipe has been closed by either end.
    pub fn is_closed(&self) -> bool {
        self.local_closed.load(Ordering::SeqCst) || self.pipe.is_closed() || self.tx.is_closed()
    }
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct EndpointReceiver {
    id: HandleId,
    rx: mpsc::UnboundedReceiver<Message>,
    pipe: Arc<PipeState>,
    local_closed: Arc<AtomicBool>,
}

impl EndpointReceiver {
    /// Identity of the endpoint this half belongs to.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Receive the next message in FIFO order.
    ///
    /// Returns `None` immediately after this end was closed. After the peer
    /// closed, messages it sent beforehand are still delivered first.
    pub async fn recv(&mut self) -> Option<Message> {
        let mut closed = self.pipe.closed.subscribe();
        loop {
            if self.local_closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.pipe.close();
                    return None;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }
            if self.pipe.is_closed() {
                return None;
            }
            tokio::select! {
                biased;
                message = self.rx.recv() => {
                    if message.is_none() {
                        self.pipe.close();
                    }
                    if self.local_closed.load(Ordering::SeqCst) {
                        return None;
                    }
                    return message;
                }
                changed = closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
