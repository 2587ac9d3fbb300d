//! Pipe framing shared by both channels.
//!
//! Each message is a little-endian `u32` length followed by that many bytes.
//! The first body byte tags the message kind.

use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest inbound message accepted; bigger ones are skipped.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Longest error text carried by an error status message.
pub const MAX_ERROR_LEN: usize = 255;

const TAG_SHUTDOWN: u8 = b'e';
const TAG_RECONFIGURE: u8 = b'c';

const TAG_READY: u8 = b'r';
const TAG_ERROR: u8 = b'e';
const TAG_BUFFER: u8 = b'b';

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the channel on a message boundary.
    #[error("channel closed")]
    Closed,
    #[error("truncated message: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("empty message")]
    Empty,
    #[error("message of {0} bytes exceeds the size limit")]
    Oversized(usize),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Whether the read loop may keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated { .. } | ProtocolError::Empty | ProtocolError::Oversized(_)
        )
    }
}

/// Inbound command, decoded once at the channel boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
    /// Serialized parameter snapshot.
    Reconfigure(Bytes),
    Unknown(u8),
}

impl ControlMessage {
    /// Decodes a non-empty message body.
    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let payload = body.split_off(1);
        Ok(match body[0] {
            TAG_SHUTDOWN => ControlMessage::Shutdown,
            TAG_RECONFIGURE => ControlMessage::Reconfigure(payload),
            tag => ControlMessage::Unknown(tag),
        })
    }

    pub fn encode(&self) -> Bytes {
        match self {
            ControlMessage::Shutdown => frame(&[&[TAG_SHUTDOWN]]),
            ControlMessage::Reconfigure(payload) => frame(&[&[TAG_RECONFIGURE], payload]),
            ControlMessage::Unknown(tag) => frame(&[&[*tag]]),
        }
    }
}

/// Status messages written on the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ready,
    Error(String),
}

impl Status {
    pub fn encode(&self) -> Bytes {
        match self {
            Status::Ready => frame(&[&[TAG_READY]]),
            Status::Error(text) => frame(&[&[TAG_ERROR], truncate_utf8(text, MAX_ERROR_LEN).as_bytes()]),
        }
    }
}

/// Encodes one media unit: `['b'][u64 LE timestamp][data]`.
pub fn encode_buffer(timestamp: u64, data: &[u8]) -> Bytes {
    frame(&[&[TAG_BUFFER], &timestamp.to_le_bytes(), data])
}

fn frame(parts: &[&[u8]]) -> Bytes {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32_le(len as u32);
    for part in parts {
        buf.put_slice(part);
    }
    buf.freeze()
}

fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Reads one message body from `r`.
///
/// A zero-length or oversized message is consumed and reported as a
/// recoverable error so the caller can read again.
pub fn read_message<R: Read>(r: &mut R) -> Result<Bytes, ProtocolError> {
    let mut len_bytes = [0u8; 4];
    let got = read_full(r, &mut len_bytes)?;
    if got == 0 {
        return Err(ProtocolError::Closed);
    }
    if got < len_bytes.len() {
        return Err(ProtocolError::Truncated {
            expected: len_bytes.len(),
            got,
        });
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 {
        return Err(ProtocolError::Empty);
    }
    if len > MAX_MESSAGE_LEN {
        io::copy(&mut r.take(len as u64), &mut io::sink())?;
        return Err(ProtocolError::Oversized(len));
    }

    let mut body = vec![0u8; len];
    let got = read_full(r, &mut body)?;
    if got < len {
        return Err(ProtocolError::Truncated { expected: len, got });
    }
    Ok(Bytes::from(body))
}

/// Like `read_exact`, but reports how much was read before EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes an already framed message in one piece.
pub fn write_framed<W: Write + ?Sized>(w: &mut W, framed: &[u8]) -> io::Result<()> {
    w.write_all(framed)?;
    w.flush()
}

/// Parsed outbound message, used by tests to check the wire stream.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Ready,
    Error(String),
    Buffer { timestamp: u64, data: Vec<u8> },
}

#[cfg(test)]
pub(crate) fn parse_outbound(mut stream: &[u8]) -> Vec<Outbound> {
    let mut out = Vec::new();
    while !stream.is_empty() {
        let body = read_message(&mut stream).expect("well-formed outbound stream");
        out.push(match body[0] {
            TAG_READY => Outbound::Ready,
            TAG_ERROR => Outbound::Error(String::from_utf8(body[1..].to_vec()).unwrap()),
            TAG_BUFFER => {
                let ts = u64::from_le_bytes(body[1..9].try_into().unwrap());
                Outbound::Buffer {
                    timestamp: ts,
                    data: body[9..].to_vec(),
                }
            }
            other => panic!("unexpected outbound tag {other}"),
        });
    }
    out
}
