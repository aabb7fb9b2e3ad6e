//! RFC 6455 and the HyBi-10 draft.
//!
//! # Responsibilities
//! - Recognize the declared `Sec-WebSocket-Version`
//! - Verify the upgrade request and compute `Sec-WebSocket-Accept`
//! - Decode masked client frames into messages (fragments reassembled)
//! - Encode server messages
//!
//! # Design Decisions
//! - Both flavors share handshake and framing; only version matching and the
//!   advertised version number differ
//! - Malformed key material is an incomplete handshake, not a 400
//! - Any other verification failure is answered with a 400 response

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::http::response::BAD_REQUEST;
use crate::http::{HandshakeResponse, ParsedRequest};
use crate::protocol::frame::{encode_frame, parse_frame, Opcode};
use crate::protocol::{
    CloseFrame, DecodeState, Decoded, FrameError, HandshakeError, Message, Utf8Validator,
    VersionCodec,
};

/// GUID appended to the client key (RFC 6455 section 1.3).
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_bytes: usize,
    pub max_message_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Rfc6455,
    HyBi10,
}

/// Codec for `Sec-WebSocket-Version` 13 (RFC 6455) or 6 through 12 (HyBi).
#[derive(Debug)]
pub struct HybiCodec {
    flavor: Flavor,
    validator: Arc<Utf8Validator>,
    limits: FrameLimits,
}

impl HybiCodec {
    pub fn rfc6455(validator: Arc<Utf8Validator>, limits: FrameLimits) -> Self {
        Self {
            flavor: Flavor::Rfc6455,
            validator,
            limits,
        }
    }

    pub fn hybi10(validator: Arc<Utf8Validator>, limits: FrameLimits) -> Self {
        Self {
            flavor: Flavor::HyBi10,
            validator,
            limits,
        }
    }

    fn declared_version(request: &ParsedRequest) -> Option<u16> {
        request.header("sec-websocket-version")?.trim().parse().ok()
    }

    fn finish_message(&self, opcode: Opcode, payload: Bytes) -> Result<Message, FrameError> {
        match opcode {
            Opcode::Text => self
                .validator
                .text(&payload)
                .map(Message::Text)
                .ok_or(FrameError::InvalidUtf8),
            _ => Ok(Message::Binary(payload)),
        }
    }

    fn control_message(&self, opcode: Opcode, payload: Bytes) -> Result<Message, FrameError> {
        match opcode {
            Opcode::Ping => Ok(Message::Ping(payload)),
            Opcode::Pong => Ok(Message::Pong(payload)),
            _ => parse_close(&payload),
        }
    }
}

/// `base64(sha1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// A valid key is base64 of exactly 16 bytes.
fn valid_key(key: &str) -> bool {
    STANDARD
        .decode(key.trim())
        .map(|decoded| decoded.len() == 16)
        .unwrap_or(false)
}

fn parse_close(payload: &[u8]) -> Result<Message, FrameError> {
    match payload {
        [] => Ok(Message::Close(None)),
        [_] => Err(FrameError::InvalidClosePayload),
        [hi, lo, reason @ ..] => {
            let code = u16::from_be_bytes([*hi, *lo]);
            if !valid_close_code(code) {
                return Err(FrameError::InvalidClosePayload);
            }
            let reason = std::str::from_utf8(reason).map_err(|_| FrameError::InvalidClosePayload)?;
            Ok(Message::Close(Some(CloseFrame::new(code, reason))))
        }
    }
}

fn valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

impl VersionCodec for HybiCodec {
    fn id(&self) -> &'static str {
        match self.flavor {
            Flavor::Rfc6455 => "rfc6455",
            Flavor::HyBi10 => "hybi10",
        }
    }

    fn version_number(&self) -> u16 {
        match self.flavor {
            Flavor::Rfc6455 => 13,
            Flavor::HyBi10 => 6,
        }
    }

    fn matches(&self, request: &ParsedRequest) -> bool {
        match (self.flavor, Self::declared_version(request)) {
            (Flavor::Rfc6455, Some(version)) => version == 13,
            (Flavor::HyBi10, Some(version)) => (6..13).contains(&version),
            (_, None) => false,
        }
    }

    fn handshake(&self, request: &ParsedRequest) -> Result<HandshakeResponse, HandshakeError> {
        let headers = request.headers();
        let verified = request.method().eq_ignore_ascii_case("GET")
            && request.http_version() >= 1
            && request.path().starts_with('/')
            && headers.contains("host")
            && headers.has_token("upgrade", "websocket")
            && headers.has_token("connection", "upgrade")
            && self.matches(request);
        if !verified {
            return Ok(HandshakeResponse::new(BAD_REQUEST).with_header("Content-Length", "0"));
        }

        let key = headers
            .get("sec-websocket-key")
            .ok_or(HandshakeError::Incomplete("missing Sec-WebSocket-Key"))?;
        if !valid_key(key) {
            return Err(HandshakeError::Incomplete("malformed Sec-WebSocket-Key"));
        }

        Ok(HandshakeResponse::switching_protocols()
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", accept_key(key)))
    }

    fn decode(&self, bytes: &[u8], state: &mut DecodeState) -> Result<Decoded, FrameError> {
        state.buffer.extend_from_slice(bytes);
        loop {
            let Some((frame, used)) = parse_frame(&state.buffer, self.limits.max_frame_bytes)? else {
                return Ok(Decoded::Incomplete);
            };
            let _ = state.buffer.split_to(used);

            if frame.opcode.is_control() {
                return self.control_message(frame.opcode, frame.payload).map(Decoded::Message);
            }

            let (opcode, data) = match (frame.opcode, state.partial.take()) {
                (Opcode::Continuation, None) => return Err(FrameError::UnexpectedContinuation),
                (Opcode::Continuation, Some((opcode, mut data))) => {
                    data.extend_from_slice(&frame.payload);
                    (opcode, data)
                }
                (_, Some(_)) => return Err(FrameError::InterleavedData),
                (opcode, None) => (opcode, BytesMut::from(&frame.payload[..])),
            };

            if data.len() > self.limits.max_message_bytes {
                return Err(FrameError::MessageTooLarge {
                    size: data.len(),
                    limit: self.limits.max_message_bytes,
                });
            }

            if frame.fin {
                return self.finish_message(opcode, data.freeze()).map(Decoded::Message);
            }
            state.partial = Some((opcode, data));
        }
    }

    fn encode(&self, message: &Message) -> Bytes {
        match message {
            Message::Text(text) => encode_frame(true, Opcode::Text, text.as_bytes()),
            Message::Binary(data) => encode_frame(true, Opcode::Binary, data),
            Message::Ping(data) => encode_frame(true, Opcode::Ping, data),
            Message::Pong(data) => encode_frame(true, Opcode::Pong, data),
            Message::Close(None) => encode_frame(true, Opcode::Close, &[]),
            Message::Close(Some(close)) => {
                let mut payload = BytesMut::with_capacity(2 + close.reason.len());
                payload.put_u16(close.code);
                payload.extend_from_slice(close.reason.as_bytes());
                encode_frame(true, Opcode::Close, &payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Assembly, RequestAssembler};
    use crate::protocol::frame::encode_client_frame;

    const MASK: [u8; 4] = [1, 2, 3, 4];

    fn codec() -> HybiCodec {
        HybiCodec::rfc6455(Arc::new(Utf8Validator::default()), FrameLimits::default())
    }

    fn parse(raw: &str) -> ParsedRequest {
        match RequestAssembler::new(4096).feed(raw.as_bytes()) {
            Assembly::Complete(request) => request,
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    fn upgrade(version: &str, key: &str) -> ParsedRequest {
        parse(&format!(
            "GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\n\
             Connection: keep-alive, Upgrade\r\nSec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: {version}\r\n\r\n"
        ))
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn version_matching_per_flavor() {
        let validator = Arc::new(Utf8Validator::default());
        let rfc = HybiCodec::rfc6455(validator.clone(), FrameLimits::default());
        let hybi = HybiCodec::hybi10(validator, FrameLimits::default());
        let key = "dGhlIHNhbXBsZSBub25jZQ==";

        assert!(rfc.matches(&upgrade("13", key)));
        assert!(!rfc.matches(&upgrade("8", key)));
        assert!(hybi.matches(&upgrade("8", key)));
        assert!(!hybi.matches(&upgrade("13", key)));
        assert!(!hybi.matches(&upgrade("99", key)));
        assert!(!rfc.matches(&upgrade("abc", key)));
    }

    #[test]
    fn handshake_switches_protocols() {
        let response = codec().handshake(&upgrade("13", "dGhlIHNhbXBsZSBub25jZQ==")).unwrap();
        assert!(response.is_switching_protocols());
        assert_eq!(response.header("Sec-WebSocket-Accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert_eq!(response.header("upgrade"), Some("websocket"));
    }

    #[test]
    fn malformed_key_is_incomplete() {
        assert_eq!(
            codec().handshake(&upgrade("13", "not-a-key")),
            Err(HandshakeError::Incomplete("malformed Sec-WebSocket-Key"))
        );
    }

    #[test]
    fn missing_upgrade_header_is_bad_request() {
        let request = parse(
            "GET /chat HTTP/1.1\r\nHost: h\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        );
        let response = codec().handshake(&request).unwrap();
        assert_eq!(response.status(), BAD_REQUEST);
    }

    #[test]
    fn decode_survives_split_frames() {
        let codec = codec();
        let mut state = DecodeState::new();
        let wire = encode_client_frame(true, Opcode::Text, b"hi", MASK);

        let (head, tail) = wire.split_at(3);
        assert_eq!(codec.decode(head, &mut state).unwrap(), Decoded::Incomplete);
        assert_eq!(
            codec.decode(tail, &mut state).unwrap(),
            Decoded::Message(Message::Text("hi".into()))
        );
        assert_eq!(codec.decode(&[], &mut state).unwrap(), Decoded::Incomplete);
        assert_eq!(state.buffered(), 0);
    }

    #[test]
    fn decode_reassembles_fragments_around_control_frames() {
        let codec = codec();
        let mut state = DecodeState::new();
        let mut wire = encode_client_frame(false, Opcode::Text, b"hel", MASK).to_vec();
        wire.extend_from_slice(&encode_client_frame(true, Opcode::Ping, b"p", MASK));
        wire.extend_from_slice(&encode_client_frame(true, Opcode::Continuation, b"lo", MASK));

        assert_eq!(
            codec.decode(&wire, &mut state).unwrap(),
            Decoded::Message(Message::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(
            codec.decode(&[], &mut state).unwrap(),
            Decoded::Message(Message::Text("hello".into()))
        );
    }

    #[test]
    fn decode_rejects_bad_sequences() {
        let codec = codec();

        let mut state = DecodeState::new();
        let stray = encode_client_frame(true, Opcode::Continuation, b"x", MASK);
        assert_eq!(codec.decode(&stray, &mut state), Err(FrameError::UnexpectedContinuation));

        let mut state = DecodeState::new();
        let mut wire = encode_client_frame(false, Opcode::Text, b"a", MASK).to_vec();
        wire.extend_from_slice(&encode_client_frame(true, Opcode::Binary, b"b", MASK));
        assert_eq!(codec.decode(&wire, &mut state), Err(FrameError::InterleavedData));

        let mut state = DecodeState::new();
        let invalid = encode_client_frame(true, Opcode::Text, &[0xc3, 0x28], MASK);
        assert_eq!(codec.decode(&invalid, &mut state), Err(FrameError::InvalidUtf8));

        let mut state = DecodeState::new();
        let close = encode_client_frame(true, Opcode::Close, &[0x03], MASK);
        assert_eq!(codec.decode(&close, &mut state), Err(FrameError::InvalidClosePayload));
    }

    #[test]
    fn message_limit_applies_across_fragments() {
        let limits = FrameLimits {
            max_frame_bytes: 8,
            max_message_bytes: 10,
        };
        let codec = HybiCodec::rfc6455(Arc::new(Utf8Validator::default()), limits);
        let mut state = DecodeState::new();
        let mut wire = encode_client_frame(false, Opcode::Binary, &[0u8; 6], MASK).to_vec();
        wire.extend_from_slice(&encode_client_frame(true, Opcode::Continuation, &[0u8; 6], MASK));
        assert_eq!(
            codec.decode(&wire, &mut state),
            Err(FrameError::MessageTooLarge { size: 12, limit: 10 })
        );
    }

    #[test]
    fn disabled_validator_passes_invalid_text() {
        let validator = Arc::new(Utf8Validator::new(false));
        let codec = HybiCodec::rfc6455(validator, FrameLimits::default());
        let mut state = DecodeState::new();
        let invalid = encode_client_frame(true, Opcode::Text, &[b'o', b'k', 0xff], MASK);
        assert_eq!(
            codec.decode(&invalid, &mut state).unwrap(),
            Decoded::Message(Message::Text("ok\u{fffd}".into()))
        );
    }

    #[test]
    fn encodes_close_with_code() {
        let wire = codec().encode(&Message::Close(Some(CloseFrame::new(1008, "no app"))));
        assert_eq!(&wire[..4], &[0x88, 8, 0x03, 0xF0]);
        assert_eq!(&wire[4..], b"no app");
    }
}
