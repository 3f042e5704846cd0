//! JSON payloads carried by the `ACT`, `CFG` and directory-mode `NAME` frames.
//!
//! # Handshake
//!
//! ```text
//! client ──[ACT  {confirm, version, support_dir, binary?, newline?}]──► server
//! server ──[CFG  {quiet, binary, directory, overwrite, bufsize, ...}]─► client
//! ```
//!
//! After the handshake the side that owns the files runs the send loop and
//! the other side runs the receive loop (see [`crate::transfer`]).

pub mod action;
pub mod config;
pub mod name;

pub use action::TransferAction;
pub use config::{DEFAULT_BUFSIZE, DEFAULT_TIMEOUT, MAX_BUFSIZE, MIN_BUFSIZE, TransferConfig};
pub use name::{NameEntry, RequestedName};
