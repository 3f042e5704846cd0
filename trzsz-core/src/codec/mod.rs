//! Frame codec for the line protocol.
//!
//! ```text
//! #<TYPE>:<payload><newline>              newline = "\n" or "!\n"
//! #DATA:<escaped length>\n<escaped bytes>  binary mode only
//! ```
//!
//! Strings and binaries travel as base64 of their zlib-deflated bytes;
//! integers are plain decimal. [`FrameCodec`] is the `tokio_util` encoder for
//! outbound frames; inbound lines come out of the
//! [`StreamBuffer`](crate::buffer::StreamBuffer) and go through [`Frame::parse`].

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tokio_util::codec::Encoder;

use crate::escape::EscapeTable;
use crate::error::TrzszError;

/// The regular line terminator.
pub const NEWLINE: &str = "\n";

/// Terminator used when a Windows console sits on the reading side.
pub const WINDOWS_NEWLINE: &str = "!\n";

// ── Payload encoding ─────────────────────────────────────────────

/// Deflate with zlib framing, then base64.
pub fn encode_buffer(data: &[u8]) -> Result<String, TrzszError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`encode_buffer`].
pub fn decode_buffer(payload: &str) -> Result<Vec<u8>, TrzszError> {
    let compressed = STANDARD.decode(payload.trim_end())?;
    let mut out = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| TrzszError::Encoding(e.to_string()))?;
    Ok(out)
}

pub fn encode_string(s: &str) -> Result<String, TrzszError> {
    encode_buffer(s.as_bytes())
}

pub fn decode_string(payload: &str) -> Result<String, TrzszError> {
    String::from_utf8(decode_buffer(payload)?).map_err(|e| TrzszError::Encoding(e.to_string()))
}

// ── Frame ────────────────────────────────────────────────────────

/// One received protocol line, split into type and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub typ: String,
    pub payload: String,
}

impl Frame {
    pub fn new(typ: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            payload: payload.into(),
        }
    }

    /// Parse `#TYPE:payload`.
    ///
    /// A line whose first colon is missing or at position 0 is reported as
    /// an unexpected `colon` frame carrying the encoded line.
    pub fn parse(line: &[u8]) -> Result<Self, TrzszError> {
        let line = line.strip_suffix(b"!").unwrap_or(line);
        match line.iter().position(|&b| b == b':') {
            Some(idx) if idx >= 1 => Ok(Self {
                typ: String::from_utf8_lossy(&line[1..idx]).into_owned(),
                payload: String::from_utf8_lossy(&line[idx + 1..]).into_owned(),
            }),
            _ => Err(TrzszError::UnexpectedFrame {
                typ: "colon".into(),
                payload: encode_buffer(line)?,
            }),
        }
    }
}

// ── FrameCodec ───────────────────────────────────────────────────

/// A frame to be written to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// `#typ:payload` with an already-encoded payload.
    Line { typ: &'static str, payload: String },
    /// One chunk of file content, encoded according to the codec mode.
    Data(Bytes),
}

/// Encoder for the negotiated framing of one session.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    newline: &'static str,
    binary: bool,
    escape: EscapeTable,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Text mode with `\n` terminators.
    pub fn new() -> Self {
        Self {
            newline: NEWLINE,
            binary: false,
            escape: EscapeTable::none(),
        }
    }

    /// Switch `DATA` frames to length-prefixed raw bytes.
    pub fn with_binary(mut self, escape: EscapeTable) -> Self {
        self.binary = true;
        self.escape = escape;
        self
    }

    pub fn set_newline(&mut self, newline: &'static str) {
        self.newline = newline;
    }

    pub fn newline(&self) -> &'static str {
        self.newline
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn escape_table(&self) -> &EscapeTable {
        &self.escape
    }
}

impl Encoder<OutboundFrame> for FrameCodec {
    type Error = TrzszError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            OutboundFrame::Line { typ, payload } => {
                dst.reserve(typ.len() + payload.len() + 4);
                dst.put_u8(b'#');
                dst.put_slice(typ.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(payload.as_bytes());
                dst.put_slice(self.newline.as_bytes());
            }
            OutboundFrame::Data(data) if self.binary => {
                let escaped = self.escape.escape(&data);
                dst.reserve(escaped.len() + 16);
                dst.put_slice(format!("#DATA:{}\n", escaped.len()).as_bytes());
                dst.put_slice(&escaped);
            }
            OutboundFrame::Data(data) => {
                let payload = encode_buffer(&data)?;
                self.encode(OutboundFrame::Line { typ: "DATA", payload }, dst)?;
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
