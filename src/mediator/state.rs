//! Per-connection lifecycle state.
//!
//! ```text
//! Connecting ──complete request──▶ Handshaking ──101 + route──▶ Established
//!     ▲                                │                             │
//!     └────── incomplete handshake ────┘                             │
//!     │                                │                             │
//!     └──────────────── any failure / transport close ───────────────┴──▶ Closed
//! ```
//!
//! The codec is present exactly in `Handshaking` and `Established`; the
//! handler exactly in `Established`. Transitions are methods so the pairing
//! cannot drift.

use std::sync::Arc;

use crate::app::Handler;
use crate::http::{ParsedRequest, RequestAssembler};
use crate::net::WsConnection;
use crate::protocol::{DecodeState, VersionCodec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Handshaking,
    Established,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Handshaking => "handshaking",
            Phase::Established => "established",
            Phase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ConnectionState {
    phase: Phase,
    pub(crate) assembler: RequestAssembler,
    pending_request: Option<ParsedRequest>,
    version: Option<Arc<dyn VersionCodec>>,
    handler: Option<Arc<dyn Handler>>,
    upgraded: Option<WsConnection>,
    pub(crate) decode: DecodeState,
}

impl ConnectionState {
    pub fn new(max_request_bytes: usize) -> Self {
        Self {
            phase: Phase::Connecting,
            assembler: RequestAssembler::new(max_request_bytes),
            pending_request: None,
            version: None,
            handler: None,
            upgraded: None,
            decode: DecodeState::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_request(&self) -> Option<&ParsedRequest> {
        self.pending_request.as_ref()
    }

    pub fn version(&self) -> Option<&Arc<dyn VersionCodec>> {
        self.version.as_ref()
    }

    pub fn handler(&self) -> Option<&Arc<dyn Handler>> {
        self.handler.as_ref()
    }

    pub fn upgraded(&self) -> Option<&WsConnection> {
        self.upgraded.as_ref()
    }

    /// `Connecting → Handshaking` with the selected codec.
    pub fn begin_handshake(&mut self, request: ParsedRequest, codec: Arc<dyn VersionCodec>) {
        debug_assert_eq!(self.phase, Phase::Connecting);
        self.phase = Phase::Handshaking;
        self.pending_request = Some(request);
        self.version = Some(codec);
    }

    /// `Handshaking → Connecting`: the attempt is dropped and buffering resumes.
    pub fn abandon_handshake(&mut self) {
        self.phase = Phase::Connecting;
        self.pending_request = None;
        self.version = None;
    }

    /// Take the request out while the handshake is being completed.
    pub fn take_request(&mut self) -> Option<ParsedRequest> {
        self.pending_request.take()
    }

    /// `Handshaking → Established`.
    pub fn establish(&mut self, handler: Arc<dyn Handler>, upgraded: WsConnection) {
        debug_assert_eq!(self.phase, Phase::Handshaking);
        self.phase = Phase::Established;
        self.pending_request = None;
        self.handler = Some(handler);
        self.upgraded = Some(upgraded);
    }

    /// Any phase `→ Closed`; buffered partial state is discarded.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.pending_request = None;
        self.version = None;
        self.handler = None;
        self.upgraded = None;
        self.decode = DecodeState::new();
    }

    /// Codec is set iff handshaking or established; handler iff established.
    pub fn is_consistent(&self) -> bool {
        let versioned = matches!(self.phase, Phase::Handshaking | Phase::Established);
        let established = self.phase == Phase::Established;
        self.version.is_some() == versioned
            && self.handler.is_some() == established
            && self.upgraded.is_some() == established
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("phase", &self.phase)
            .field("version", &self.version.as_ref().map(|codec| codec.id()))
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}
