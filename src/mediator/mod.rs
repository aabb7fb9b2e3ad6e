//! Connection mediation subsystem.
//!
//! # Data Flow
//! ```text
//! Transport events (open, data, close, error)
//!     → engine.rs (per-connection state machine)
//!     → state.rs (Connecting → Handshaking → Established → Closed)
//!     → registry.rs (established connections)
//!     → fanout.rs (which handlers observe close/error)
//! ```
//!
//! # Design Decisions
//! - The mediator is the only owner of connection state
//! - The application directory and version registry are injected and
//!   read-only once traffic flows
//! - Close and error fan-out scope is a single configurable policy

pub mod engine;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod state;

pub use engine::{ConnectionMediator, MediatorSettings};
pub use error::MediatorError;
pub use fanout::FanoutPolicy;
pub use registry::{ConnectionRegistry, Upgraded};
pub use state::{ConnectionState, Phase};
