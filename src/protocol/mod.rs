//! WebSocket protocol version subsystem.
//!
//! # Data Flow
//! ```text
//! ParsedRequest
//!     → registry.rs (first enabled codec whose `matches` is true)
//!     → hybi.rs (handshake → HandshakeResponse | Incomplete)
//!
//! Established connection bytes
//!     → hybi.rs decode (frame.rs, incremental, per-connection DecodeState)
//!     → Message → mediator → handler
//!
//! Handler messages
//!     → hybi.rs encode → bytes
//! ```
//!
//! # Design Decisions
//! - Codecs are stateless; all per-connection decode state lives in
//!   `DecodeState`, owned by the connection
//! - Variants are a closed set registered in an explicit order
//! - UTF-8 strictness is one process-wide toggle shared by all codecs

pub mod frame;
pub mod hybi;
pub mod registry;
pub mod validator;

use bytes::{Bytes, BytesMut};

use crate::http::{HandshakeResponse, ParsedRequest};

pub use frame::{FrameError, Opcode};
pub use hybi::{FrameLimits, HybiCodec};
pub use registry::VersionRegistry;
pub use validator::Utf8Validator;

/// Status codes carried in close frames.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

/// A complete WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

impl Message {
    /// Text and binary messages; these are what handlers receive.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Binary(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Result of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    Incomplete,
}

/// Handshake attempts the codec could not validate.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// Key material is missing or malformed. The attempt is dropped and the
    /// connection keeps waiting for bytes.
    #[error("incomplete handshake: {0}")]
    Incomplete(&'static str),
}

/// Per-connection decoder state.
#[derive(Debug, Default)]
pub struct DecodeState {
    pub(crate) buffer: BytesMut,
    pub(crate) partial: Option<(Opcode, BytesMut)>,
}

impl DecodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.partial.as_ref().map_or(0, |(_, data)| data.len())
    }
}

/// A protocol-version-specific handshake validator and frame codec.
pub trait VersionCodec: Send + Sync + std::fmt::Debug {
    /// Stable identifier used in configuration (`rfc6455`, `hybi10`).
    fn id(&self) -> &'static str;

    /// Value advertised in `Sec-WebSocket-Version`.
    fn version_number(&self) -> u16;

    /// True if this codec speaks the version the request declares.
    fn matches(&self, request: &ParsedRequest) -> bool;

    /// Validate the request and build the response to send.
    ///
    /// A response whose status is not 101 is sent and the connection closed.
    fn handshake(&self, request: &ParsedRequest) -> Result<HandshakeResponse, HandshakeError>;

    /// Append `bytes` to `state` and try to produce one message.
    ///
    /// Call again with an empty slice to drain further buffered messages.
    fn decode(&self, bytes: &[u8], state: &mut DecodeState) -> Result<Decoded, FrameError>;

    fn encode(&self, message: &Message) -> Bytes;
}
