//! Logging and metrics for the mediator.
//!
//! # Data Flow
//! ```text
//! Connection lifecycle (mediator, net):
//!     → logging.rs (structured log events, `connection_id` field)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection ID flows through all connection log events
//! - Recording without an installed exporter is a no-op, so the library
//!   runs the same with metrics disabled

pub mod logging;
pub mod metrics;
