//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → server.rs (one task per connection: read, write, events)
//!     → connection.rs (IDs, outbound handles, lifetime tracking)
//!     → Hand off to the mediator
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The socket is owned by its task; everything else holds a queue handle

pub mod connection;
pub mod listener;
pub mod server;

pub use connection::{
    Connection, ConnectionError, ConnectionGuard, ConnectionId, ConnectionTracker, Outbound,
    SendError, WsConnection,
};
pub use listener::{Accepted, ConnectionPermit, Listener, ListenerError};
pub use server::{ServerError, WebSocketServer};
