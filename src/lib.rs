//! WebSocket connection mediator library.
//!
//! Parses upgrade requests, negotiates protocol versions and sub-protocols,
//! routes connections to hosted applications and drives the connection
//! lifecycle between raw sockets and message handlers.

pub mod app;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mediator;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod routing;

pub use config::MediatorConfig;
pub use lifecycle::Shutdown;
pub use mediator::ConnectionMediator;
pub use net::WebSocketServer;
