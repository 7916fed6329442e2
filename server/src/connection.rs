//! One live client connection as the dispatcher sees it.
//!
//! DESIGN
//! ======
//! The dispatcher never touches sockets. Each listener (raw TCP, WebSocket)
//! owns its socket and hands the dispatcher a [`Connection`] whose outbound
//! side is a [`Transport`]. The stock transport, [`ChannelTransport`], is a
//! bounded queue drained by the listener's writer, plus a cancellation token
//! the listener watches so that disposing a connection ends its read loop.
//!
//! A full outbound queue is a fault, not back-pressure: a peer that stops
//! reading is cut off instead of stalling the broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use frames::{Codec, CodecError, Framer, Message};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Most unterminated bytes an unregistered connection may buffer.
pub const UNREGISTERED_BUFFER_CAP: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("network fault: {0}")]
    NetworkFault(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] CodecError),
}

/// Outbound half of a connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one already-framed message.
    async fn send(&self, bytes: Vec<u8>) -> Result<(), ConnectionError>;

    /// Stop the connection. Must be safe to call more than once.
    fn close(&self);
}

pub struct ChannelTransport {
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
}

impl ChannelTransport {
    /// Returns the transport, the receiver the socket writer drains, and the
    /// token that fires when the connection is closed from either side.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>, CancellationToken) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        (Self { outbound, shutdown: shutdown.clone() }, rx, shutdown)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, bytes: Vec<u8>) -> Result<(), ConnectionError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::NetworkFault("connection closed".into()));
        }
        self.outbound.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::NetworkFault("outbound queue full".into()),
            TrySendError::Closed(_) => ConnectionError::NetworkFault("connection closed".into()),
        })
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

pub struct Connection {
    id: Uuid,
    peer: String,
    transport: Box<dyn Transport>,
    codec: Codec,
    framer: Mutex<Framer>,
    name: RwLock<String>,
    registered: AtomicBool,
    disposed: AtomicBool,
}

impl Connection {
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, framer: Framer, peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            transport,
            codec: framer.codec().clone(),
            framer: Mutex::new(framer),
            name: RwLock::new(String::new()),
            registered: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Registered name, or empty before registration.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_registered(&self, name: &str) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.to_owned();
        self.registered.store(true, Ordering::Release);
    }

    /// Encode, frame and queue `message`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NetworkFault`] when the connection is
    /// disposed or its transport refuses the frame.
    pub async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::NetworkFault("connection disposed".into()));
        }
        let bytes = self.codec.encode_frame(message)?;
        self.transport.send(bytes).await
    }

    /// Feed received bytes through the framer.
    ///
    /// Before registration the unterminated remainder is capped at
    /// [`UNREGISTERED_BUFFER_CAP`] bytes; past that it is discarded. A chunk
    /// that completes a frame keeps its tail, since that frame may be the
    /// registration the tail belongs after.
    pub fn ingest(&self, bytes: &[u8]) -> Vec<Message> {
        if self.is_disposed() {
            return Vec::new();
        }
        let mut framer = self.framer.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = framer.append(bytes);
        if messages.is_empty() && !self.is_registered() && framer.pending_len() > UNREGISTERED_BUFFER_CAP {
            warn!(conn = %self.id, peer = %self.peer, pending = framer.pending_len(), "connection: unregistered peer overflowed buffer; discarding");
            framer.clear();
        }
        messages
    }

    /// Close the transport and drop buffered input. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registered.store(false, Ordering::Release);
        self.transport.close();
        self.framer.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &self.name())
            .field("registered", &self.is_registered())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
