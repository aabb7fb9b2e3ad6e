//! Process lifecycle: startup wiring, signals and shutdown.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Version registry → Application directory → Mediator → Listener
//!
//! Shutdown (shutdown.rs):
//!     Trigger (latched) → accept loop stops → going-away close per peer
//!     → tasks drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Startup fails before binding if any version or application is rejected
//! - The drain gives up after a deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{shutdown_signal, spawn_signal_listener};
pub use startup::{build_mediator, start, StartupError};
