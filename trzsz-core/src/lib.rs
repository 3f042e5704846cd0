//! # trzsz-core
//!
//! File transfer tunneled through an interactive terminal session.
//!
//! This crate contains:
//! - **Escape**: `EscapeTable` for raw binary chunks on channels that eat control bytes
//! - **Buffer**: `StreamBuffer` turning output chunks into awaited lines and blocks
//! - **Magic**: `MagicKeyDetector` and `UniqueIdCache` for transfer announcements
//! - **Codec**: `FrameCodec` for `#TYPE:payload` frames via `tokio_util`
//! - **Protocol payloads**: `TransferAction`, `TransferConfig`, `NameEntry`
//! - **State**: `TransferPhase`, the validated session state machine
//! - **Transfer**: `Transfer` engine for both the client and the server role
//! - **Filter**: `TrzszFilter` sitting between a terminal and a remote shell
//! - **File**: `FileReader` / `FileWriter` seams with a `tokio::fs` implementation
//! - **Error**: `TrzszError`, a typed, `thiserror`-based error hierarchy

pub mod buffer;
pub mod codec;
pub mod error;
pub mod escape;
pub mod file;
pub mod filter;
pub mod magic;
pub mod output;
pub mod progress;
pub mod protocol;
pub mod state;
pub mod transfer;

/// Protocol version announced in magic keys and `ACT` frames.
pub const TRZSZ_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{Chunk, StreamBuffer};
pub use codec::{Frame, FrameCodec, OutboundFrame};
pub use error::TrzszError;
pub use escape::EscapeTable;
pub use file::{FileReader, FileWriter, LocalSaveTarget, SaveTarget, check_paths_readable};
pub use filter::{FilterHost, FilterOptions, TrzszFilter};
pub use magic::{MagicKey, MagicKeyDetector, TransferMode, UniqueIdCache};
pub use output::format_saved_files;
pub use progress::ProgressCallback;
pub use protocol::{NameEntry, RequestedName, TransferAction, TransferConfig};
pub use state::TransferPhase;
pub use transfer::{PeerWriter, Transfer, TransferControl, TransferOptions};
