//! Handshake responses.
//!
//! # Responsibilities
//! - Represent the HTTP response a codec produces for a handshake
//! - Let the mediator add negotiated and identification headers
//! - Build the 400 / 413 rejections sent before any upgrade
//! - Serialize to HTTP/1.1 wire bytes
//!
//! # Design Decisions
//! - Header names keep their casing on the wire; lookup ignores case
//! - Setting a header replaces any earlier value of the same name

use bytes::Bytes;

pub const SWITCHING_PROTOCOLS: u16 = 101;
pub const BAD_REQUEST: u16 = 400;
pub const PAYLOAD_TOO_LARGE: u16 = 413;

/// Server identification header.
pub const X_POWERED_BY: &str = "X-Powered-By";

/// Response to one upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    status: u16,
    headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// A 101 response.
    pub fn switching_protocols() -> Self {
        Self::new(SWITCHING_PROTOCOLS)
    }

    /// A failure response advertising the supported versions.
    ///
    /// Used for header-buffer overflow (413) and for requests no enabled
    /// version accepts (400).
    pub fn rejection(status: u16, supported_versions: &str, server_name: &str) -> Self {
        Self::new(status)
            .with_header("Sec-WebSocket-Version", supported_versions)
            .with_header(X_POWERED_BY, server_name)
            .with_header("Content-Length", "0")
            .with_header("Connection", "close")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_switching_protocols(&self) -> bool {
        self.status == SWITCHING_PROTOCOLS
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        Bytes::from(out)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
