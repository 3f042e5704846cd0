//! File access seams used by the transfer engine.
//!
//! The engine never touches a filesystem directly: it reads through
//! [`FileReader`], writes through [`FileWriter`], and asks a [`SaveTarget`]
//! to open writers. [`local`] implements them on `tokio::fs`; embedders
//! with other storage (browser handles, in-memory tests) bring their own.

use std::collections::HashSet;
use std::io;

use async_trait::async_trait;

use crate::error::TrzszError;
use crate::protocol::RequestedName;

pub mod local;

pub use local::{LocalFileReader, LocalFileWriter, LocalSaveTarget, check_paths_readable};

/// A file or directory marker to be sent.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Index of the top-level selection this entry came from.
    fn path_id(&self) -> u32;

    /// Segments relative to the parent of the top-level selection.
    fn rel_path(&self) -> &[String];

    fn is_dir(&self) -> bool;

    /// Byte size; 0 for directories.
    fn size(&self) -> u64;

    fn file_name(&self) -> &str {
        self.rel_path().last().map(String::as_str).unwrap_or_default()
    }

    /// Fill `buf` with the next bytes; `Ok(0)` at end of file.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Destination of one received entry.
#[async_trait]
pub trait FileWriter: Send {
    /// Name requested by the sender (last path segment).
    fn file_name(&self) -> &str;

    /// Name actually used locally, after collision renaming.
    fn local_name(&self) -> &str;

    fn is_dir(&self) -> bool;

    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Factory for writers, bound to one destination.
#[async_trait]
pub trait SaveTarget: Send {
    /// Human-readable destination for the final summary.
    fn destination(&self) -> Option<String>;

    /// Open a writer for `name`, renaming on collision unless `overwrite`.
    async fn open_save_file(
        &mut self,
        name: &RequestedName,
        overwrite: bool,
    ) -> Result<Box<dyn FileWriter>, TrzszError>;
}

/// Fail if two readers would land on the same relative path.
pub fn check_duplicate_names(readers: &[Box<dyn FileReader>]) -> Result<(), TrzszError> {
    let mut names = HashSet::new();
    for reader in readers {
        let path = reader.rel_path().join("/");
        if !names.insert(path.clone()) {
            return Err(TrzszError::User(format!("Duplicate name: {path}")));
        }
    }
    Ok(())
}
