//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request (host, path, Sec-WebSocket-Protocol)
//!     → directory.rs (application by first path segment, else virtual host)
//!     → Application::locate_handler(handler_path)
//!     → subprotocol.rs (requested ∩ handler-supported, client order)
//!     → Return: Route or NotFound
//! ```
//!
//! # Design Decisions
//! - Directory built at startup, immutable at runtime
//! - No regex in hot path (exact name and host lookups only)
//! - Deterministic: same input always matches same route

pub mod directory;
pub mod subprotocol;

pub use directory::{ApplicationDirectory, Resolution, Route, RouteError};
pub use subprotocol::{negotiate, SubProtocolNegotiator};
