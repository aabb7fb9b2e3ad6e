//! Transport driver: turns sockets into mediator events.
//!
//! # Responsibilities
//! - Accept connections under the listener's connection limit
//! - Run one task per connection that reads, writes and reports events
//! - Stop accepting on shutdown and drain live connections
//!
//! # Data Flow
//! ```text
//! accept → spawn task
//!     task: open → (read → data)* → close (guaranteed by a drop guard)
//!           outbound queue → write, in order
//!           queued close → flush, shut down socket
//!           read/write failure → error → close
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::mediator::ConnectionMediator;
use crate::net::connection::{Connection, ConnectionError, ConnectionGuard, ConnectionTracker, Outbound};
use crate::net::listener::{Accepted, Listener, ListenerError};

/// Size of a single socket read.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long live connections get to finish after shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

#[derive(Debug, Clone)]
pub struct WebSocketServer {
    mediator: Arc<ConnectionMediator>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl WebSocketServer {
    pub fn new(mediator: Arc<ConnectionMediator>) -> Self {
        Self {
            mediator,
            tracker: ConnectionTracker::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn mediator(&self) -> &Arc<ConnectionMediator> {
        &self.mediator
    }

    /// Connection tasks still running.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept until `shutdown` fires, then drain.
    pub async fn run(&self, listener: Listener, shutdown: &Shutdown) -> Result<(), ServerError> {
        let mut stop = shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "WebSocket server starting");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        let guard = self.tracker.track();
                        let mediator = Arc::clone(&self.mediator);
                        let stop = shutdown.subscribe();
                        tokio::spawn(serve_connection(mediator, accepted, guard, stop));
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = stop.recv() => break,
            }
        }

        tracing::info!(active = self.tracker.active_count(), "Shutdown requested, draining connections");
        if tokio::time::timeout(self.drain_timeout, self.tracker.wait_idle()).await.is_err() {
            tracing::warn!(active = self.tracker.active_count(), "Drain timed out");
        }
        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

async fn serve_connection(
    mediator: Arc<ConnectionMediator>,
    accepted: Accepted,
    guard: ConnectionGuard,
    mut stop: ShutdownSignal,
) {
    let Accepted { mut stream, peer, slot } = accepted;
    let (conn, mut outbound) = Connection::with_id(guard.id(), Some(peer));
    mediator.open(&conn);
    let deregister = CloseOnExit {
        mediator: mediator.as_ref(),
        conn: &conn,
    };

    let (mut reader, mut writer) = stream.split();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut stopping = false;

    let outcome: Result<(), std::io::Error> = loop {
        tokio::select! {
            biased;

            Some(work) = outbound.recv() => match work {
                Outbound::Data(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        break Err(e);
                    }
                }
                Outbound::Close => break Ok(()),
            },
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    tracing::trace!(connection_id = %conn.id(), bytes = n, "Read");
                    if let Err(err) = mediator.data(&conn, &chunk[..n]) {
                        tracing::debug!(connection_id = %conn.id(), outcome = err.outcome(), "Data rejected");
                    }
                }
                Err(e) => break Err(e),
            },
            _ = stop.recv(), if !stopping => {
                stopping = true;
                mediator.going_away(&conn);
            }
        }
    };

    if let Err(e) = outcome {
        mediator.error(&conn, &ConnectionError::Transport(e));
    }
    let _ = writer.shutdown().await;
    drop(deregister);
    tracing::trace!(connection_id = %conn.id(), "Connection task finished");
    drop(guard);
    drop(slot);
}

/// Emits the mediator's `close` when the connection task ends, whether it
/// returns, unwinds or is dropped by the runtime.
struct CloseOnExit<'a> {
    mediator: &'a ConnectionMediator,
    conn: &'a Connection,
}

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.mediator.close(self.conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::MediatorSettings;
    use crate::protocol::VersionRegistry;
    use crate::routing::ApplicationDirectory;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn shutdown_stops_accept_loop() {
        let versions = VersionRegistry::from_config(&Default::default(), &Default::default()).unwrap();
        let mediator = ConnectionMediator::new(
            Arc::new(ApplicationDirectory::new()),
            Arc::new(versions),
            MediatorSettings::default(),
        );
        let server = WebSocketServer::new(Arc::new(mediator)).with_drain_timeout(Duration::from_millis(200));
        let listener = Listener::from_tcp(TcpListener::bind("127.0.0.1:0").await.unwrap(), 4).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();

        let run = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(listener, &shutdown).await })
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_connections(), 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap().unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(server.active_connections(), 0);
    }
}
