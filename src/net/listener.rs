//! Bounded TCP acceptor.
//!
//! # Responsibilities
//! - Bind the WebSocket port
//! - Cap concurrent connection tasks; at the cap, accepting pauses
//! - Tune accepted sockets for small interactive frames

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
    /// The slot pool was closed; no further connections can be admitted.
    #[error("listener closed")]
    Closed,
}

/// A socket admitted under the connection cap.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: ConnectionPermit,
}

#[derive(Debug)]
pub struct Listener {
    tcp: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|source| ListenerError::Address {
            address: config.bind_address.clone(),
            source,
        })?;
        let tcp = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_tcp(tcp, config.max_connections)
    }

    /// Wrap a socket that is already bound, e.g. to an ephemeral port.
    pub fn from_tcp(tcp: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let address = tcp.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(%address, max_connections, "Listener bound");
        Ok(Self {
            tcp,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free slot, then for the next connection.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.tcp.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Could not disable Nagle");
        }
        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.slots.available_permits(),
            "Connection accepted"
        );
        Ok(Accepted {
            stream,
            peer,
            slot: ConnectionPermit(permit),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One of `max_connections` slots; released on drop, including when the
/// owning task panics.
#[derive(Debug)]
pub struct ConnectionPermit(#[allow(dead_code)] OwnedSemaphorePermit);
