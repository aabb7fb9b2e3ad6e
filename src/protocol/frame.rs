//! WebSocket frame layer shared by the HyBi family of drafts and RFC 6455.
//!
//! Parsing is incremental: `parse_frame` looks at a buffer and either
//! returns a full frame with the number of bytes it used, or `None` when the
//! buffer ends mid-frame.

use bytes::{BufMut, Bytes, BytesMut};

/// Longest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value & 0x0F {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Reasons a client frame or message is rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,
    #[error("client frames must be masked")]
    Unmasked,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("control frames must not be fragmented")]
    FragmentedControl,
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(usize),
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: u64, limit: usize },
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedData,
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed close frame payload")]
    InvalidClosePayload,
}

/// A single unmasked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Try to parse one client frame from the front of `buffer`.
///
/// Returns the frame and the number of bytes it occupied.
pub fn parse_frame(buffer: &[u8], max_frame: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    let &[first, second, ..] = buffer else {
        return Ok(None);
    };

    if first & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first)?;
    if second & 0x80 == 0 {
        return Err(FrameError::Unmasked);
    }

    let (len, mut offset) = match second & 0x7F {
        126 => match buffer.get(2..4) {
            Some(b) => (u64::from(u16::from_be_bytes([b[0], b[1]])), 4),
            None => return Ok(None),
        },
        127 => match buffer.get(2..10) {
            Some(b) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                (u64::from_be_bytes(raw), 10)
            }
            None => return Ok(None),
        },
        short => (u64::from(short), 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLarge(len as usize));
        }
    }
    if len > max_frame as u64 {
        return Err(FrameError::FrameTooLarge { size: len, limit: max_frame });
    }
    let len = len as usize;

    let Some(mask) = buffer.get(offset..offset + 4) else {
        return Ok(None);
    };
    let mask = [mask[0], mask[1], mask[2], mask[3]];
    offset += 4;

    let Some(masked) = buffer.get(offset..offset + len) else {
        return Ok(None);
    };
    let payload: Vec<u8> = masked
        .iter()
        .enumerate()
        .map(|(i, byte)| byte ^ mask[i % 4])
        .collect();

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload: Bytes::from(payload),
        },
        offset + len,
    )))
}

/// Encode a server frame. Server frames are never masked.
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 10);
    out.put_u8(if fin { 0x80 } else { 0x00 } | opcode.as_u8());
    match payload.len() {
        len @ 0..=125 => out.put_u8(len as u8),
        len @ 126..=0xFFFF => {
            out.put_u8(126);
            out.put_u16(len as u16);
        }
        len => {
            out.put_u8(127);
            out.put_u64(len as u64);
        }
    }
    out.extend_from_slice(payload);
    out.freeze()
}

/// Encode a masked client frame. Used by tests that play the client.
pub fn encode_client_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 14);
    out.put_u8(if fin { 0x80 } else { 0x00 } | opcode.as_u8());
    match payload.len() {
        len @ 0..=125 => out.put_u8(0x80 | len as u8),
        len @ 126..=0xFFFF => {
            out.put_u8(0x80 | 126);
            out.put_u16(len as u16);
        }
        len => {
            out.put_u8(0x80 | 127);
            out.put_u64(len as u64);
        }
    }
    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn parses_rfc_masked_hello() {
        // RFC 6455 section 5.7: a single-frame masked text message "Hello".
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, used) = parse_frame(&wire, 1024).unwrap().unwrap();
        assert_eq!(used, wire.len());
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn partial_frames_need_more_bytes() {
        let wire = encode_client_frame(true, Opcode::Binary, &[7u8; 300], MASK);
        for cut in 0..wire.len() {
            assert_eq!(parse_frame(&wire[..cut], 1024).unwrap(), None, "cut at {cut}");
        }
        let (frame, used) = parse_frame(&wire, 1024).unwrap().unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn rejects_protocol_violations() {
        let unmasked = encode_frame(true, Opcode::Text, b"hi");
        assert_eq!(parse_frame(&unmasked, 1024), Err(FrameError::Unmasked));

        let mut reserved = encode_client_frame(true, Opcode::Text, b"hi", MASK).to_vec();
        reserved[0] |= 0x40;
        assert_eq!(parse_frame(&reserved, 1024), Err(FrameError::ReservedBits));

        let fragmented_ping = encode_client_frame(false, Opcode::Ping, b"", MASK);
        assert_eq!(parse_frame(&fragmented_ping, 1024), Err(FrameError::FragmentedControl));

        let big_ping = encode_client_frame(true, Opcode::Ping, &[0u8; 126], MASK);
        assert_eq!(parse_frame(&big_ping, 1024), Err(FrameError::ControlTooLarge(126)));

        let big = encode_client_frame(true, Opcode::Binary, &[0u8; 2048], MASK);
        assert_eq!(
            parse_frame(&big, 1024),
            Err(FrameError::FrameTooLarge { size: 2048, limit: 1024 })
        );

        assert_eq!(parse_frame(&[0x83, 0x80], 1024), Err(FrameError::UnknownOpcode(3)));
    }

    #[test]
    fn server_frames_use_extended_lengths() {
        assert_eq!(&encode_frame(true, Opcode::Text, b"hi")[..2], &[0x81, 0x02]);
        let medium = encode_frame(true, Opcode::Binary, &[0u8; 200]);
        assert_eq!(&medium[..4], &[0x82, 126, 0x00, 200]);
        let large = encode_frame(false, Opcode::Binary, &vec![0u8; 70_000]);
        assert_eq!(large[0], 0x02);
        assert_eq!(large[1], 127);
        assert_eq!(large.len(), 70_000 + 10);
    }
}
