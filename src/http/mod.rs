//! HTTP upgrade handling subsystem.
//!
//! # Data Flow
//! ```text
//! raw bytes from one connection
//!     → assembler.rs (buffer until header terminator, enforce limit)
//!     → request.rs (ParsedRequest: host, path, headers)
//!     → [version registry picks a codec]
//!     → response.rs (handshake response / 400 / 413 rejections)
//!     → bytes queued back to the client
//! ```
//!
//! # Design Decisions
//! - The assembler owns per-connection buffering; parsing itself is httparse
//! - Parsed requests are immutable; routing returns a `RoutedRequest`

pub mod assembler;
pub mod request;
pub mod response;

pub use assembler::{Assembly, RequestAssembler, DEFAULT_MAX_REQUEST_BYTES};
pub use request::{Headers, ParsedRequest, RoutedRequest};
pub use response::HandshakeResponse;
