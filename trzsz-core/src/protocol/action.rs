//! `ACT` payload: the client's answer to a magic key.

use serde::{Deserialize, Serialize};

use crate::codec::WINDOWS_NEWLINE;
use crate::error::TrzszError;

/// Capabilities and consent sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAction {
    /// Implementation language of the sender, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// `false` when the user cancelled the file or folder dialog.
    pub confirm: bool,

    /// Version of the sending implementation.
    pub version: String,

    /// The client can receive and send directories.
    #[serde(default)]
    pub support_dir: bool,

    /// `Some(false)` forbids binary mode (Windows consoles mangle raw bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<bool>,

    /// Terminator the server must use for the rest of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newline: Option<String>,
}

impl TransferAction {
    pub fn new(confirm: bool) -> Self {
        Self {
            lang: Some("rs".into()),
            confirm,
            version: crate::TRZSZ_VERSION.into(),
            support_dir: true,
            binary: None,
            newline: None,
        }
    }

    /// Restrict the session for a client talking to a Windows console.
    pub fn for_windows_shell(mut self) -> Self {
        self.binary = Some(false);
        self.newline = Some(WINDOWS_NEWLINE.into());
        self
    }

    pub fn to_json(&self) -> Result<String, TrzszError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict parse: `confirm` and `version` are required.
    pub fn from_json(json: &str) -> Result<Self, TrzszError> {
        serde_json::from_str(json)
            .map_err(|e| TrzszError::ProtocolViolation(format!("invalid ACT payload: {e}")))
    }

    /// Whether the client allows binary `DATA` frames.
    pub fn allows_binary(&self) -> bool {
        self.binary != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_action_json() {
        let json = TransferAction::new(true).to_json().unwrap();
        assert!(json.contains("\"confirm\":true"));
        assert!(json.contains("\"support_dir\":true"));
        assert!(!json.contains("newline"));
    }

    #[test]
    fn windows_shell_action() {
        let action = TransferAction::new(true).for_windows_shell();
        assert!(!action.allows_binary());
        let parsed = TransferAction::from_json(&action.to_json().unwrap()).unwrap();
        assert_eq!(parsed.newline.as_deref(), Some("!\n"));
    }

    #[test]
    fn parse_peer_action() {
        let action =
            TransferAction::from_json(r#"{"lang":"py","confirm":false,"version":"1.1.0","extra":1}"#)
                .unwrap();
        assert!(!action.confirm);
        assert!(!action.support_dir);
        assert!(action.allows_binary());
    }

    #[test]
    fn missing_required_fields() {
        assert!(matches!(
            TransferAction::from_json(r#"{"version":"1.1.0"}"#),
            Err(TrzszError::ProtocolViolation(_))
        ));
        assert!(TransferAction::from_json(r#"{"confirm":true}"#).is_err());
    }
}
