//! Domain-specific error types for the trzsz protocol.
//!
//! All fallible operations return `Result<T, TrzszError>`.
//! Peer input never panics; every failure is typed so the session
//! handler can decide whether to stay silent, log, or report back.

use thiserror::Error;

/// The canonical error type for a transfer session.
#[derive(Debug, Error)]
pub enum TrzszError {
    // ── Cancellation ─────────────────────────────────────────────
    /// The peer sent a Ctrl-C byte in the middle of a line.
    #[error("Interrupted")]
    Interrupted,

    /// The local user stopped the transfer.
    #[error("Stopped")]
    Stopped,

    /// No data chunk arrived within the configured timeout.
    #[error("Receive data timeout")]
    ReceiveTimeout,

    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame of an unexpected type (or a malformed line) was received.
    #[error("[TrzszError] {typ}: {payload}")]
    UnexpectedFrame { typ: String, payload: String },

    /// A frame or call sequence violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The echoed integer did not match what was sent.
    #[error("Integer check [{actual}] <> [{expected}]")]
    IntegerCheck { actual: u64, expected: u64 },

    /// The echoed binary did not match what was sent.
    #[error("Binary check [{actual}] <> [{expected}]")]
    BinaryCheck { actual: String, expected: String },

    /// The received content does not hash to the sender's digest.
    #[error("Check MD5 failed")]
    Md5Mismatch,

    // ── Remote Signals ───────────────────────────────────────────
    /// The peer ended the session with an `EXIT` frame.
    #[error("{message}")]
    RemoteExit { message: String },

    /// The peer reported a failure with a `FAIL` (trace) or `fail` frame.
    #[error("{message}")]
    RemoteFail { message: String, trace: bool },

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A JSON payload could not be parsed or produced.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    // ── Local Errors ─────────────────────────────────────────────
    /// Filesystem or transport failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// An expected, user-facing condition such as a missing file.
    #[error("{0}")]
    User(String),
}

impl TrzszError {
    /// Whether the failure is worth a stack-trace-like report.
    ///
    /// Expected conditions (cancellation, missing files, timeouts) are
    /// reported to the peer with `fail` and are not logged.
    pub fn is_trace_back(&self) -> bool {
        match self {
            Self::Interrupted
            | Self::Stopped
            | Self::ReceiveTimeout
            | Self::Md5Mismatch
            | Self::User(_)
            | Self::RemoteExit { .. } => false,
            Self::RemoteFail { trace, .. } => *trace,
            _ => true,
        }
    }

    pub fn is_remote_exit(&self) -> bool {
        matches!(self, Self::RemoteExit { .. })
    }

    pub fn is_remote_fail(&self) -> bool {
        matches!(self, Self::RemoteFail { .. })
    }

    /// Build the error for a frame whose type differs from the one expected.
    ///
    /// `EXIT`, `FAIL` and `fail` carry an encoded message from the peer;
    /// any other type is a protocol violation.
    pub fn from_frame(typ: &str, payload: &str) -> Self {
        let decode = || match crate::codec::decode_string(payload) {
            Ok(message) => message,
            Err(e) => format!("decode [{payload}] error: {e}"),
        };
        match typ {
            "EXIT" => Self::RemoteExit { message: decode() },
            "FAIL" => Self::RemoteFail {
                message: decode(),
                trace: true,
            },
            "fail" => Self::RemoteFail {
                message: decode(),
                trace: false,
            },
            _ => Self::UnexpectedFrame {
                typ: typ.to_string(),
                payload: payload.to_string(),
            },
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TrzszError {
    fn from(s: String) -> Self {
        TrzszError::User(s)
    }
}

impl From<&str> for TrzszError {
    fn from(s: &str) -> Self {
        TrzszError::User(s.to_string())
    }
}

impl From<base64::DecodeError> for TrzszError {
    fn from(e: base64::DecodeError) -> Self {
        TrzszError::Encoding(e.to_string())
    }
}
