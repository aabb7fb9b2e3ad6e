//! Per-connection failure taxonomy.

use crate::protocol::FrameError;
use crate::routing::RouteError;

/// Why a connection left the happy path.
///
/// Every variant is local to one connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediatorError {
    /// Header buffer limit exceeded before a complete request arrived. 413.
    #[error("upgrade request exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
    /// Complete header block that is not valid HTTP. 400.
    #[error("malformed upgrade request")]
    MalformedRequest,
    /// No enabled codec matches the declared version. 400.
    #[error("unsupported WebSocket version {0:?}")]
    UnsupportedVersion(Option<String>),
    /// Key material missing or malformed; the connection keeps buffering.
    #[error("incomplete handshake: {0}")]
    IncompleteHandshake(&'static str),
    /// The codec answered with something other than 101.
    #[error("handshake rejected with status {status}")]
    HandshakeRejected { status: u16 },
    /// Handshake completed but no application matched. Closed with 1008.
    #[error("application not found for host '{host}' path '{path}'")]
    ApplicationNotFound { host: String, path: String },
    /// Application matched but has no handler at the path. Closed with 1008.
    #[error("handler not found in '{application}' at '{handler_path}'")]
    HandlerNotFound {
        application: String,
        handler_path: String,
    },
    /// Malformed frame on an established connection. Fatal.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] FrameError),
    /// A handler callback panicked; the connection is closed.
    #[error("handler panicked in {callback}")]
    HandlerPanicked { callback: &'static str },
}

impl MediatorError {
    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            MediatorError::BufferOverflow { .. } => "overflow",
            MediatorError::MalformedRequest => "malformed",
            MediatorError::UnsupportedVersion(_) => "unsupported_version",
            MediatorError::IncompleteHandshake(_) => "incomplete",
            MediatorError::HandshakeRejected { .. } => "rejected",
            MediatorError::ApplicationNotFound { .. } => "application_not_found",
            MediatorError::HandlerNotFound { .. } => "handler_not_found",
            MediatorError::FrameDecode(_) => "frame_error",
            MediatorError::HandlerPanicked { .. } => "handler_panic",
        }
    }

    /// True if the connection survives this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MediatorError::IncompleteHandshake(_))
    }
}

impl From<RouteError> for MediatorError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::ApplicationNotFound { host, path } => MediatorError::ApplicationNotFound { host, path },
            RouteError::HandlerNotFound {
                application,
                handler_path,
            } => MediatorError::HandlerNotFound {
                application,
                handler_path,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_incomplete_handshake_is_recoverable() {
        assert!(MediatorError::IncompleteHandshake("missing key").is_recoverable());
        assert!(!MediatorError::BufferOverflow { limit: 1 }.is_recoverable());
        assert!(!MediatorError::FrameDecode(FrameError::Unmasked).is_recoverable());
        assert!(!MediatorError::HandlerPanicked { callback: "on_open" }.is_recoverable());
    }

    #[test]
    fn route_errors_keep_their_level() {
        let err: MediatorError = RouteError::HandlerNotFound {
            application: "a".into(),
            handler_path: "/x".into(),
        }
        .into();
        assert_eq!(err.outcome(), "handler_not_found");
    }
}
