//! Incremental assembly of the HTTP upgrade request.
//!
//! # Responsibilities
//! - Buffer bytes for one connection until the header terminator arrives
//! - Enforce the buffered-request limit (Overflow → 413)
//! - Parse the header block into a `ParsedRequest`
//!
//! # Design Decisions
//! - Chunk boundaries never matter: parsing always runs on the whole buffer
//! - After `Complete` the bytes stay buffered until `finish` so a rejected
//!   handshake attempt can be re-parsed once more bytes arrive
//! - Overflow is reported once; afterwards input is discarded

use bytes::{Bytes, BytesMut};

use crate::http::request::{Headers, ParsedRequest};

/// Default limit on buffered request bytes.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;

/// Maximum number of header lines accepted in one request.
const MAX_HEADERS: usize = 64;

/// Result of feeding bytes to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// A full request is available.
    Complete(ParsedRequest),
    /// More bytes are needed.
    Incomplete,
    /// The buffer limit was exceeded before a request could be built.
    Overflow,
    /// The header block is complete but is not valid HTTP.
    Invalid,
}

/// Per-connection upgrade request buffer.
#[derive(Debug)]
pub struct RequestAssembler {
    buffer: BytesMut,
    limit: usize,
    overflowed: bool,
}

impl RequestAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
            overflowed: false,
        }
    }

    /// Append bytes and try to build a request from everything buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Assembly {
        if self.overflowed {
            return Assembly::Incomplete;
        }
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > self.limit {
            return self.overflow();
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&self.buffer) {
            Ok(httparse::Status::Complete(header_len)) => {
                let mut parsed_headers = Headers::new();
                for header in req.headers.iter() {
                    parsed_headers.insert(header.name, String::from_utf8_lossy(header.value).trim());
                }
                let method = req.method.unwrap_or_default().to_string();
                let target = req.path.unwrap_or_default().to_string();
                let version = req.version.unwrap_or_default();

                let raw = Bytes::copy_from_slice(&self.buffer[..header_len]);
                let body = Bytes::copy_from_slice(&self.buffer[header_len..]);
                Assembly::Complete(ParsedRequest::new(method, target, version, parsed_headers, raw, body))
            }
            Ok(httparse::Status::Partial) => Assembly::Incomplete,
            Err(error) => {
                if has_terminator(&self.buffer) {
                    tracing::debug!(%error, "Malformed upgrade request");
                    Assembly::Invalid
                } else {
                    // Garbage before the terminator still waits for it, so
                    // it is bounded by the overflow limit like any request.
                    Assembly::Incomplete
                }
            }
        }
    }

    /// Release the buffer once the handshake is done.
    ///
    /// Returns whatever followed the header block.
    pub fn finish(&mut self) -> Bytes {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let trailing = match req.parse(&self.buffer) {
            Ok(httparse::Status::Complete(header_len)) => {
                Bytes::copy_from_slice(&self.buffer[header_len..])
            }
            _ => Bytes::new(),
        };
        self.buffer = BytesMut::new();
        trailing
    }

    /// Number of bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    fn overflow(&mut self) -> Assembly {
        self.overflowed = true;
        self.buffer = BytesMut::new();
        Assembly::Overflow
    }
}

fn has_terminator(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const REQUEST: &[u8] = b"GET /myapp/chat HTTP/1.1\r\n\
Host: example.com:8080\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
\r\n";

    fn feed_chunks(assembler: &mut RequestAssembler, bytes: &[u8], cuts: &[usize]) -> Vec<Assembly> {
        let mut outcomes = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            let end = cut.clamp(start, bytes.len());
            outcomes.push(assembler.feed(&bytes[start..end]));
            start = end;
        }
        outcomes
    }

    #[test]
    fn single_delivery_completes() {
        let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
        match assembler.feed(REQUEST) {
            Assembly::Complete(req) => {
                assert_eq!(req.method(), "GET");
                assert_eq!(req.host(), "example.com");
                assert_eq!(req.path(), "/myapp/chat");
                assert_eq!(req.header("sec-websocket-version"), Some("13"));
                assert_eq!(req.raw_headers().len(), REQUEST.len());
                assert!(req.body().is_empty());
            }
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    #[test]
    fn byte_at_a_time_completes_once() {
        let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
        let outcomes: Vec<_> = REQUEST.iter().map(|b| assembler.feed(&[*b])).collect();
        let completes = outcomes
            .iter()
            .filter(|o| matches!(o, Assembly::Complete(_)))
            .count();
        assert_eq!(completes, 1);
        assert!(matches!(outcomes.last(), Some(Assembly::Complete(_))));
    }

    #[test]
    fn overflow_reported_once_and_never_completes() {
        let mut assembler = RequestAssembler::new(64);
        let mut outcomes = Vec::new();
        for _ in 0..20 {
            outcomes.push(assembler.feed(b"X-Filler: aaaaaaaaaa\r\n"));
        }
        outcomes.push(assembler.feed(b"\r\n"));
        assert_eq!(outcomes.iter().filter(|o| **o == Assembly::Overflow).count(), 1);
        assert!(!outcomes.iter().any(|o| matches!(o, Assembly::Complete(_))));
        assert!(assembler.has_overflowed());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn malformed_request_is_invalid_once_terminated() {
        let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
        assert_eq!(assembler.feed(b"GET /x HTTP/1.1\r\nBad Header\r\n"), Assembly::Incomplete);
        assert_eq!(assembler.feed(b"\r\n"), Assembly::Invalid);
    }

    #[test]
    fn trailing_bytes_become_body_and_survive_finish() {
        let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
        let mut bytes = REQUEST.to_vec();
        bytes.extend_from_slice(b"\x81\x80");
        match assembler.feed(&bytes) {
            Assembly::Complete(req) => assert_eq!(&req.body()[..], b"\x81\x80"),
            other => panic!("expected complete request, got {other:?}"),
        }
        assert_eq!(&assembler.finish()[..], b"\x81\x80");
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn complete_request_is_reparsed_with_more_bytes() {
        let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
        assert!(matches!(assembler.feed(REQUEST), Assembly::Complete(_)));
        match assembler.feed(b"12345678") {
            Assembly::Complete(req) => assert_eq!(&req.body()[..], b"12345678"),
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_the_result(mut cuts in proptest::collection::vec(0..REQUEST.len(), 0..12)) {
            cuts.sort_unstable();
            let mut assembler = RequestAssembler::new(DEFAULT_MAX_REQUEST_BYTES);
            let outcomes = feed_chunks(&mut assembler, REQUEST, &cuts);

            let completes: Vec<_> = outcomes
                .iter()
                .filter_map(|o| match o {
                    Assembly::Complete(req) => Some(req.clone()),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(completes.len(), 1);
            prop_assert_eq!(completes[0].path(), "/myapp/chat");
            prop_assert!(outcomes.iter().all(|o| !matches!(o, Assembly::Overflow | Assembly::Invalid)));
        }
    }
}
