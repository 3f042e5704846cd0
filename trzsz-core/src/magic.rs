//! Magic key detection.
//!
//! The remote `trz`/`tsz` announces a transfer by printing
//!
//! ```text
//! ::TRZSZ:TRANSFER:<mode>:<x.y.z>[:<unique id>]
//!   mode: S = client downloads, R = client uploads, D = client uploads directories
//! ```
//!
//! Server output can be large, so candidates are located by comparing the
//! 16-byte prefix as two little-endian `u64` words at each `:` before the
//! regex runs on the short tail.

use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;

use regex::bytes::Regex;

/// Every magic key starts with these 16 bytes.
pub const MAGIC_PREFIX: &[u8; 16] = b"::TRZSZ:TRANSFER";

/// Bytes kept from one chunk to detect a key split across chunks.
const CARRY_LEN: usize = 64;

static MAGIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^::TRZSZ:TRANSFER:([SRD]):(\d+\.\d+\.\d+)(:\d+)?").expect("valid magic key pattern")
});

// ── TransferMode ─────────────────────────────────────────────────

/// What the remote side asks the client to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// `S`: the remote sends, the client saves.
    Download,
    /// `R`: the client sends files.
    Upload,
    /// `D`: the client sends files and directories.
    UploadDirectory,
}

impl TransferMode {
    pub fn as_char(self) -> char {
        match self {
            Self::Download => 'S',
            Self::Upload => 'R',
            Self::UploadDirectory => 'D',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'S' => Some(Self::Download),
            b'R' => Some(Self::Upload),
            b'D' => Some(Self::UploadDirectory),
            _ => None,
        }
    }
}

// ── MagicKey ─────────────────────────────────────────────────────

/// A parsed transfer announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicKey {
    pub mode: TransferMode,
    pub version: String,
    /// Digits after the version, without the leading colon.
    pub unique_id: Option<String>,
}

impl MagicKey {
    /// Parse a key at the start of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let caps = MAGIC_PATTERN.captures(data)?;
        let mode = TransferMode::from_byte(caps.get(1)?.as_bytes()[0])?;
        let version = String::from_utf8_lossy(caps.get(2)?.as_bytes()).into_owned();
        let unique_id = caps
            .get(3)
            .map(|m| String::from_utf8_lossy(&m.as_bytes()[1..]).into_owned());
        Some(Self {
            mode,
            version,
            unique_id,
        })
    }

    /// The announcement line as the remote prints it.
    pub fn format(mode: TransferMode, version: &str, unique_id: &str) -> String {
        format!("::TRZSZ:TRANSFER:{}:{version}:{unique_id}", mode.as_char())
    }

    /// Whether the unique id marks a Windows remote (`1` or a `...10` suffix).
    pub fn remote_is_windows(&self) -> bool {
        match self.unique_id.as_deref() {
            Some("1") => true,
            Some(id) => id.len() == 13 && id.ends_with("10"),
            None => false,
        }
    }
}

/// Build a unique id from a millisecond timestamp and a platform suffix
/// (`00` normal, `10` Windows, `20` tmux).
pub fn unique_id(millis: u64, suffix: u8) -> String {
    let base = millis % 100_000_000_000;
    format!("{}", base * 100 + u64::from(suffix % 100))
}

// ── Prefix search ────────────────────────────────────────────────

fn word(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Index of the last occurrence of [`MAGIC_PREFIX`] in `data`.
pub fn find_magic_key(data: &[u8]) -> Option<usize> {
    if data.len() < MAGIC_PREFIX.len() {
        return None;
    }
    let (head, tail) = (word(&MAGIC_PREFIX[..8]), word(&MAGIC_PREFIX[8..]));
    (0..=data.len() - MAGIC_PREFIX.len())
        .rev()
        .filter(|&i| data[i] == b':')
        .find(|&i| word(&data[i..]) == head && word(&data[i + 8..]) == tail)
}

// ── MagicKeyDetector ─────────────────────────────────────────────

/// Stateful detector fed with consecutive output chunks.
///
/// The tail of a chunk without a complete key is carried over, so a key
/// split across two chunks is still found exactly once.
#[derive(Debug, Default)]
pub struct MagicKeyDetector {
    carry: Vec<u8>,
}

impl MagicKeyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(&mut self, chunk: &[u8]) -> Option<MagicKey> {
        let carry = std::mem::take(&mut self.carry);
        if let Some(idx) = find_magic_key(chunk) {
            if let Some(key) = MagicKey::parse(&chunk[idx..]) {
                return Some(key);
            }
        } else if !carry.is_empty() {
            let mut joined = carry.clone();
            joined.extend_from_slice(&chunk[..chunk.len().min(CARRY_LEN * 2)]);
            if let Some(idx) = find_magic_key(&joined) {
                if let Some(key) = MagicKey::parse(&joined[idx..]) {
                    return Some(key);
                }
            }
        }
        self.keep_tail(&carry, chunk);
        None
    }

    /// Forget any partial key.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    fn keep_tail(&mut self, carry: &[u8], chunk: &[u8]) {
        if chunk.len() >= CARRY_LEN {
            self.carry = chunk[chunk.len() - CARRY_LEN..].to_vec();
        } else {
            let keep = CARRY_LEN - chunk.len();
            self.carry = carry[carry.len().saturating_sub(keep)..].to_vec();
            self.carry.extend_from_slice(chunk);
        }
    }
}

// ── UniqueIdCache ────────────────────────────────────────────────

/// Capacity of the unique id table before the oldest half is dropped.
pub const UNIQUE_ID_CAPACITY: usize = 100;

/// Remembers recently processed unique ids so a redrawn key is ignored.
#[derive(Debug, Default)]
pub struct UniqueIdCache {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl UniqueIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was already processed; records it otherwise.
    ///
    /// Short ids and plain `...00` ids outside a Windows shell are never
    /// tracked, since they cannot come from a redraw.
    pub fn check(&mut self, unique_id: &str, windows_shell: bool) -> bool {
        if unique_id.len() < 7 {
            return false;
        }
        if !windows_shell && unique_id.len() == 13 && unique_id.ends_with("00") {
            return false;
        }
        if self.seen.contains(unique_id) {
            return true;
        }
        if self.order.len() >= UNIQUE_ID_CAPACITY {
            for old in self.order.drain(..UNIQUE_ID_CAPACITY / 2) {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(unique_id.to_string());
        self.seen.insert(unique_id.to_string());
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_prefix_positions() {
        assert_eq!(find_magic_key(b"abc"), None);
        assert_eq!(find_magic_key(b"abc::"), None);
        assert_eq!(find_magic_key(b"abc::TRZSZ:TRANSFEX"), None);
        assert_eq!(find_magic_key(b"::TRZSZ:TRANSFER"), Some(0));
        assert_eq!(find_magic_key(b"abc::TRZSZ:TRANSFER:1"), Some(3));
        assert_eq!(find_magic_key(b"a:b:c:::::::TRZSZ:TRANSFER:1"), Some(10));
    }

    #[test]
    fn last_occurrence_wins() {
        let data = b"::TRZSZ:TRANSFER:S:1.0.0:1\r\n::TRZSZ:TRANSFER:R:1.0.0:2";
        let idx = find_magic_key(data).unwrap();
        let key = MagicKey::parse(&data[idx..]).unwrap();
        assert_eq!(key.mode, TransferMode::Upload);
        assert_eq!(key.unique_id.as_deref(), Some("2"));
    }

    #[test]
    fn parse_keys() {
        let key = MagicKey::parse(b"::TRZSZ:TRANSFER:D:1.1.6:1666000000010\r\n").unwrap();
        assert_eq!(key.mode, TransferMode::UploadDirectory);
        assert_eq!(key.version, "1.1.6");
        assert!(key.remote_is_windows());

        let key = MagicKey::parse(b"::TRZSZ:TRANSFER:S:1.0.0").unwrap();
        assert_eq!(key.unique_id, None);
        assert!(!key.remote_is_windows());

        assert!(MagicKey::parse(b"::TRZSZ:TRANSFER:R:\n").is_none());
        assert!(MagicKey::parse(b"::TRZSZ:TRANSFER:X:1.0.0").is_none());
    }

    #[test]
    fn format_then_parse() {
        let line = MagicKey::format(TransferMode::Upload, "1.1.6", "1");
        let key = MagicKey::parse(line.as_bytes()).unwrap();
        assert_eq!(key.mode, TransferMode::Upload);
        assert!(key.remote_is_windows());
    }

    #[test]
    fn unique_id_suffix() {
        let id = unique_id(1_666_000_000_123, 10);
        assert_eq!(id.len(), 13);
        assert!(id.ends_with("10"));
        let id = unique_id(1_666_000_000_123, 0);
        assert!(id.ends_with("2300"));
    }

    #[test]
    fn detector_every_split_point() {
        let output = b"$ tsz a.txt\r\n\x1b7\x07::TRZSZ:TRANSFER:S:1.1.6:1666000000000\r\n";
        for split in 0..=output.len() {
            let mut detector = MagicKeyDetector::new();
            let first = detector.detect(&output[..split]);
            let second = detector.detect(&output[split..]);
            let found: Vec<_> = [first, second].into_iter().flatten().collect();
            assert_eq!(found.len(), 1, "split at {split}");
            assert_eq!(found[0].mode, TransferMode::Download);
            assert_eq!(found[0].version, "1.1.6");
        }
    }

    #[test]
    fn detector_byte_by_byte() {
        let output = b"noise ::TRZSZ:TRANSFER:R:1.1.6:1666000000000\r\n";
        let mut detector = MagicKeyDetector::new();
        let found = output
            .iter()
            .filter_map(|b| detector.detect(std::slice::from_ref(b)))
            .count();
        assert_eq!(found, 1);
    }

    #[test]
    fn detector_ignores_plain_output() {
        let mut detector = MagicKeyDetector::new();
        assert!(detector.detect(b"ls -l\r\n").is_none());
        assert!(detector.detect(&[b'x'; 4096]).is_none());
        assert!(detector.detect(b"::TRZSZ:TRANSFER:R:\n").is_none());
    }

    #[test]
    fn unique_ids_are_deduplicated() {
        let mut cache = UniqueIdCache::new();
        assert!(!cache.check("1666000000010", false));
        assert!(cache.check("1666000000010", false));
        // short ids are never tracked
        assert!(!cache.check("0", false));
        assert!(!cache.check("0", false));
        // plain ids only matter in a Windows shell
        assert!(!cache.check("1666000000000", false));
        assert!(!cache.check("1666000000000", false));
        assert!(!cache.check("1666000000000", true));
        assert!(cache.check("1666000000000", true));
    }

    #[test]
    fn unique_id_cache_drops_oldest_half() {
        let mut cache = UniqueIdCache::new();
        for i in 0..UNIQUE_ID_CAPACITY {
            assert!(!cache.check(&format!("16660000{i:03}20"), false));
        }
        assert_eq!(cache.len(), UNIQUE_ID_CAPACITY);
        assert!(!cache.check("1666000099920", false));
        assert_eq!(cache.len(), UNIQUE_ID_CAPACITY / 2 + 1);
        assert!(!cache.check("1666000000020", false));
        assert!(cache.check(&format!("16660000{:03}20", UNIQUE_ID_CAPACITY - 1), false));
    }
}
