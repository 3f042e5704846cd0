//! # trzsz-cli: `trz` and `tsz`
//!
//! The commands run inside the remote shell. They announce a transfer
//! with a magic key on stdout, then speak the trzsz protocol over their
//! own stdin/stdout with the terminal-side filter.
//!
//! ```text
//! trz [options] [path]      Receive file(s) into path (default: .)
//! tsz [options] file...     Send file(s)
//! trz --gen-config          Write default config to stdout
//! ```

pub mod args;
pub mod config;
pub mod logging;
pub mod session;
