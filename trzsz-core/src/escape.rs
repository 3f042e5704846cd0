//! Byte escaping for raw binary chunks.
//!
//! Terminals and multiplexers may eat or rewrite control bytes, so binary
//! `DATA` chunks are escaped with a table of `raw -> [lead, code]` pairs.
//!
//! ```text
//! standard:  0xEE -> EE EE      0x7E (~) -> EE 31
//! all:       standard + 0x02 0x0D 0x10 0x11 0x13 0x18 0x1B 0x1D
//!                       0x8D 0x90 0x91 0x93 0x9D -> EE 41 .. EE 4D
//! ```
//!
//! The table travels inside the `CFG` frame as a JSON list of string pairs
//! whose characters are Latin-1 code points.

use serde::{Deserialize, Serialize};

use crate::error::TrzszError;

/// Lead byte of every escape sequence in the standard tables.
pub const ESCAPE_LEAD: u8 = 0xEE;

const CONTROL_BYTES: &[u8] = b"\x02\x0d\x10\x11\x13\x18\x1b\x1d\x8d\x90\x91\x93\x9d";

/// A bidirectional escape table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[String; 2]>", into = "Vec<[String; 2]>")]
pub struct EscapeTable {
    codes: Vec<(u8, [u8; 2])>,
}

impl EscapeTable {
    /// No escaping at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Escapes only the lead byte and `~`.
    pub fn standard() -> Self {
        Self {
            codes: vec![(ESCAPE_LEAD, [ESCAPE_LEAD, ESCAPE_LEAD]), (0x7E, [ESCAPE_LEAD, 0x31])],
        }
    }

    /// The standard table plus every known troublesome control byte.
    pub fn all() -> Self {
        let mut table = Self::standard();
        for (i, &b) in CONTROL_BYTES.iter().enumerate() {
            table.codes.push((b, [ESCAPE_LEAD, 0x41 + i as u8]));
        }
        table
    }

    /// `all()` when `escape_all` is set, otherwise `standard()`.
    pub fn for_flag(escape_all: bool) -> Self {
        if escape_all { Self::all() } else { Self::standard() }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Replace every raw byte in the table by its two-byte sequence.
    pub fn escape(&self, data: &[u8]) -> Vec<u8> {
        if self.codes.is_empty() {
            return data.to_vec();
        }
        let mut lookup: [Option<[u8; 2]>; 256] = [None; 256];
        for &(raw, seq) in &self.codes {
            lookup[raw as usize] = Some(seq);
        }
        let mut out = Vec::with_capacity(data.len() + data.len() / 8);
        for &b in data {
            match lookup[b as usize] {
                Some(seq) => out.extend_from_slice(&seq),
                None => out.push(b),
            }
        }
        out
    }

    /// Restore raw bytes, scanning greedily left to right.
    ///
    /// A trailing lead byte without a follower is kept as is.
    pub fn unescape(&self, data: &[u8]) -> Vec<u8> {
        if self.codes.is_empty() {
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            if i + 1 < data.len() {
                let pair = [data[i], data[i + 1]];
                if let Some(&(raw, _)) = self.codes.iter().find(|(_, seq)| *seq == pair) {
                    out.push(raw);
                    i += 2;
                    continue;
                }
            }
            out.push(data[i]);
            i += 1;
        }
        out
    }
}

// ── JSON form ────────────────────────────────────────────────────

fn latin1_byte(s: &str) -> Result<u8, TrzszError> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => u8::try_from(u32::from(c))
            .map_err(|_| TrzszError::ProtocolViolation(format!("escape char out of range: {s:?}"))),
        _ => Err(TrzszError::ProtocolViolation(format!(
            "escape char must be a single character: {s:?}"
        ))),
    }
}

impl TryFrom<Vec<[String; 2]>> for EscapeTable {
    type Error = TrzszError;

    fn try_from(pairs: Vec<[String; 2]>) -> Result<Self, Self::Error> {
        let mut codes = Vec::with_capacity(pairs.len());
        for [raw, escaped] in &pairs {
            let raw = latin1_byte(raw)?;
            let bytes: Vec<u8> = escaped
                .chars()
                .map(|c| latin1_byte(c.encode_utf8(&mut [0; 4])))
                .collect::<Result<_, _>>()?;
            let seq: [u8; 2] = bytes.try_into().map_err(|_| {
                TrzszError::ProtocolViolation(format!("escape sequence must be two characters: {escaped:?}"))
            })?;
            codes.push((raw, seq));
        }
        Ok(Self { codes })
    }
}

impl From<EscapeTable> for Vec<[String; 2]> {
    fn from(table: EscapeTable) -> Self {
        table
            .codes
            .iter()
            .map(|&(raw, [a, b])| {
                [
                    char::from(raw).to_string(),
                    [char::from(a), char::from(b)].iter().collect(),
                ]
            })
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────
