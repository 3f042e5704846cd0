//! `NAME` payload.
//!
//! Outside directory mode the payload is the bare file name. In directory
//! mode it is a JSON `NameEntry` so the receiver can rebuild the tree:
//!
//! ```text
//! {"path_id":0,"path_name":["photos"],"is_dir":true}
//! {"path_id":0,"path_name":["photos","2024","a.jpg"],"is_dir":false}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TrzszError;

/// One entry of a directory transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    /// Index of the top-level selection this entry belongs to.
    pub path_id: u32,
    /// Path segments relative to the parent of the top-level selection.
    pub path_name: Vec<String>,
    pub is_dir: bool,
}

/// Reject segments that could escape the destination directory.
pub fn validate_segment(segment: &str) -> Result<(), TrzszError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0'])
    {
        return Err(TrzszError::ProtocolViolation(format!(
            "invalid file name: {segment:?}"
        )));
    }
    Ok(())
}

impl NameEntry {
    pub fn to_json(&self) -> Result<String, TrzszError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict parse; every field is required and every segment validated.
    pub fn from_json(json: &str) -> Result<Self, TrzszError> {
        let entry: Self = serde_json::from_str(json)
            .map_err(|e| TrzszError::ProtocolViolation(format!("invalid NAME payload: {e}")))?;
        if entry.path_name.is_empty() {
            return Err(TrzszError::ProtocolViolation("empty path_name".into()));
        }
        for segment in &entry.path_name {
            validate_segment(segment)?;
        }
        Ok(entry)
    }

    /// The last path segment.
    pub fn file_name(&self) -> &str {
        self.path_name.last().map(String::as_str).unwrap_or_default()
    }
}

/// A name as requested by the sending side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedName {
    Plain(String),
    Entry(NameEntry),
}

impl RequestedName {
    /// Interpret a decoded `NAME` payload.
    pub fn parse(payload: &str, directory: bool) -> Result<Self, TrzszError> {
        if directory {
            return NameEntry::from_json(payload).map(Self::Entry);
        }
        validate_segment(payload)?;
        Ok(Self::Plain(payload.to_string()))
    }

    pub fn file_name(&self) -> &str {
        match self {
            Self::Plain(name) => name,
            Self::Entry(entry) => entry.file_name(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Entry(entry) if entry.is_dir)
    }
}
