//! `CFG` payload: parameters chosen by the server for one session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::escape::EscapeTable;
use crate::error::TrzszError;

/// Chunk size ceiling when the peer does not send one (10 MiB).
pub const DEFAULT_BUFSIZE: u64 = 10 * 1024 * 1024;

/// Smallest chunk size ceiling (1 KiB).
pub const MIN_BUFSIZE: u64 = 1024;

/// Largest chunk size ceiling (1 GiB), whatever the peer asks for.
pub const MAX_BUFSIZE: u64 = 1024 * 1024 * 1024;

/// Per-chunk receive timeout when the peer does not send one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

fn is_false(b: &bool) -> bool {
    !*b
}

/// Negotiated transfer parameters, immutable once exchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Hide the progress bar.
    #[serde(default, skip_serializing_if = "is_false")]
    pub quiet: bool,

    /// Send `DATA` as escaped raw bytes.
    #[serde(default, skip_serializing_if = "is_false")]
    pub binary: bool,

    /// Names are `NameEntry` JSON and directories are transferred.
    #[serde(default, skip_serializing_if = "is_false")]
    pub directory: bool,

    /// Replace existing files instead of renaming.
    #[serde(default, skip_serializing_if = "is_false")]
    pub overwrite: bool,

    /// Chunk size ceiling in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bufsize: Option<u64>,

    /// Seconds to wait for each chunk; zero or negative waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,

    #[serde(default, skip_serializing_if = "EscapeTable::is_empty")]
    pub escape_chars: EscapeTable,

    /// tmux redraws its status line into the output stream.
    #[serde(default, skip_serializing_if = "is_false")]
    pub tmux_output_junk: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_pane_width: Option<u32>,
}

impl TransferConfig {
    pub fn to_json(&self) -> Result<String, TrzszError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TrzszError> {
        serde_json::from_str(json)
            .map_err(|e| TrzszError::ProtocolViolation(format!("invalid CFG payload: {e}")))
    }

    /// Maximum chunk size, between 1 KiB and 1 GiB.
    pub fn max_buf_size(&self) -> usize {
        let size = self
            .bufsize
            .unwrap_or(DEFAULT_BUFSIZE)
            .clamp(MIN_BUFSIZE, MAX_BUFSIZE);
        usize::try_from(size).unwrap_or(usize::MAX)
    }

    /// `None` means never time out.
    pub fn chunk_timeout(&self) -> Option<Duration> {
        match self.timeout {
            None => Some(DEFAULT_TIMEOUT),
            Some(secs) if secs <= 0 => None,
            Some(secs) => Some(Duration::from_secs(secs.unsigned_abs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_string;

    #[test]
    fn parse_peer_config() {
        let json = decode_string(
            "eJyrVspJzEtXslJQKqhU0lFQSipNK86sSgUKGBqYWJiamwHFSjJzU/NLS8BiBiB+bmlFPFCgoLQkPqs0LxsoUVJUmloLAF6AF9g=",
        )
        .unwrap();
        let config = TransferConfig::from_json(&json).unwrap();
        assert_eq!(config.max_buf_size(), 1024 * 1024);
        assert_eq!(config.chunk_timeout(), Some(Duration::from_secs(100)));
        assert!(config.tmux_output_junk);
        assert!(!config.binary);
        assert!(config.escape_chars.is_empty());
    }

    #[test]
    fn defaults_when_absent() {
        let config = TransferConfig::from_json("{}").unwrap();
        assert_eq!(config.max_buf_size(), DEFAULT_BUFSIZE as usize);
        assert_eq!(config.chunk_timeout(), Some(DEFAULT_TIMEOUT));
        let config = TransferConfig::from_json(r#"{"timeout":0,"bufsize":10}"#).unwrap();
        assert_eq!(config.chunk_timeout(), None);
        assert_eq!(config.max_buf_size(), 1024);
        let config = TransferConfig::from_json(&format!(r#"{{"bufsize":{}}}"#, u64::MAX)).unwrap();
        assert_eq!(config.max_buf_size(), MAX_BUFSIZE as usize);
    }

    #[test]
    fn false_flags_are_omitted() {
        let config = TransferConfig {
            binary: true,
            escape_chars: EscapeTable::standard(),
            bufsize: Some(1024),
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert!(!json.contains("quiet"));
        assert!(json.contains("\"binary\":true"));
        assert_eq!(TransferConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn invalid_config() {
        assert!(matches!(
            TransferConfig::from_json(r#"{"bufsize":"big"}"#),
            Err(TrzszError::ProtocolViolation(_))
        ));
    }
}
