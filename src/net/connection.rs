//! Connection identity, outbound handles and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs (the Connection Registry key)
//! - Hand the mediator and handlers a cloneable outbound handle
//! - Wrap upgraded connections so handlers send messages, not bytes
//! - Count live connection tasks for graceful shutdown

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use crate::http::RoutedRequest;
use crate::protocol::{FrameError, Message, VersionCodec};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work queued for the transport task that owns the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Bytes to write, in queue order.
    Data(Bytes),
    /// Flush what was queued before, then close the socket.
    Close,
}

/// Error returned when writing to a connection that is going away.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Cause passed to `Handler::on_error`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("frame decode error: {0}")]
    Frame(#[from] FrameError),
}

/// Handle to a duplex byte stream.
///
/// The socket itself is owned by a transport task; this handle only queues
/// work for it, so it is cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl Connection {
    /// Create a connection with a freshly allocated ID.
    ///
    /// Returns the handle and the receiving end the transport drains.
    pub fn new(peer: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        Self::with_id(ConnectionId::next(), peer)
    }

    /// Create a connection for an already allocated ID.
    pub fn with_id(
        id: ConnectionId,
        peer: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id,
            peer,
            outbound,
            closing: Arc::new(AtomicBool::new(false)),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue raw bytes for the peer.
    pub fn send_raw(&self, bytes: impl Into<Bytes>) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::Closed(self.id));
        }
        self.outbound
            .send(Outbound::Data(bytes.into()))
            .map_err(|_| SendError::Closed(self.id))
    }

    /// Ask the transport to close after flushing queued bytes.
    ///
    /// Idempotent; only the first call queues the close.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
            tracing::trace!(connection_id = %self.id, "Close requested");
        }
    }

    /// True once `close` was called or the transport went away.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.outbound.is_closed()
    }
}

/// A connection that completed the upgrade handshake.
///
/// Messages sent through it are encoded with the negotiated codec.
#[derive(Debug, Clone)]
pub struct WsConnection {
    inner: Connection,
    codec: Arc<dyn VersionCodec>,
    request: Arc<RoutedRequest>,
}

impl WsConnection {
    pub fn new(inner: Connection, codec: Arc<dyn VersionCodec>, request: Arc<RoutedRequest>) -> Self {
        Self { inner, codec, request }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// The upgrade request with its routing information attached.
    pub fn request(&self) -> &RoutedRequest {
        &self.request
    }

    /// Identifier of the negotiated protocol version.
    pub fn version(&self) -> &'static str {
        self.codec.id()
    }

    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        self.inner.send_raw(self.codec.encode(message))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(&Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(&Message::Binary(data.into()))
    }

    /// Close the transport without a close frame.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    /// The underlying transport handle.
    pub fn connection(&self) -> &Connection {
        &self.inner
    }
}

/// Tracks live connection tasks for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            idle: Arc::clone(&self.idle),
            id: ConnectionId::next(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has been dropped.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    idle: Arc<Notify>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
