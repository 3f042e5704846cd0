//! Flags shared by `trz` and `tsz`.

use std::path::PathBuf;
use std::sync::LazyLock;

use clap::Args;
use regex::Regex;
use trzsz_core::protocol::{MAX_BUFSIZE, MIN_BUFSIZE};
use trzsz_core::{EscapeTable, TransferConfig};

use crate::config::TransferDefaults;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(b|k|m|g|kb|mb|gb)?$").expect("valid size regex")
});

/// Transfer flags accepted by both commands.
#[derive(Debug, Clone, Args)]
pub struct TransferArgs {
    /// Quiet (hide progress bar)
    #[arg(short, long)]
    pub quiet: bool,

    /// Yes, overwrite existing file(s)
    #[arg(short = 'y', long)]
    pub overwrite: bool,

    /// Binary transfer mode, faster for binary files
    #[arg(short, long)]
    pub binary: bool,

    /// Escape all known control characters
    #[arg(short, long)]
    pub escape: bool,

    /// Transfer directories and files
    #[arg(short, long)]
    pub directory: bool,

    /// Max buffer chunk size (1K<=N<=1G), e.g. 10M
    #[arg(short = 'B', long, value_parser = parse_size)]
    pub bufsize: Option<u64>,

    /// Timeout (N seconds) for each buffer chunk, N <= 0 means never timeout
    #[arg(short, long, allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// Configuration file path (default: ~/.trzsz.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a default configuration file and exit
    #[arg(long)]
    pub gen_config: bool,
}

/// Parse `N[b|k|m|g|kb|mb|gb]` into bytes, limited to 1K..=1G.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let caps = SIZE_RE
        .captures(value.trim())
        .ok_or_else(|| format!("invalid size {value}"))?;
    let n: u64 = caps[1].parse().map_err(|_| format!("invalid size {value}"))?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    let scale = match unit.as_str() {
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => 1,
    };
    let size = n
        .checked_mul(scale)
        .ok_or_else(|| "greater than 1G".to_string())?;
    if size < MIN_BUFSIZE {
        return Err("less than 1K".into());
    }
    if size > MAX_BUFSIZE {
        return Err("greater than 1G".into());
    }
    Ok(size)
}

impl TransferArgs {
    /// Merge flags over the config-file defaults.
    pub fn transfer_config(&self, defaults: &TransferDefaults) -> Result<TransferConfig, String> {
        let bufsize = match self.bufsize {
            Some(size) => size,
            None => parse_size(&defaults.bufsize)
                .map_err(|e| format!("bufsize {}: {e}", defaults.bufsize))?,
        };
        Ok(TransferConfig {
            quiet: self.quiet || defaults.quiet,
            binary: self.binary || defaults.binary,
            directory: self.directory,
            overwrite: self.overwrite || defaults.overwrite,
            bufsize: Some(bufsize),
            timeout: Some(self.timeout.unwrap_or(defaults.timeout)),
            escape_chars: EscapeTable::for_flag(self.escape || defaults.escape),
            ..TransferConfig::default()
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: TransferArgs,
    }

    fn parse(argv: &[&str]) -> TransferArgs {
        Cli::try_parse_from(std::iter::once("trz").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn size_units() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn size_limits() {
        assert_eq!(parse_size("1023").unwrap_err(), "less than 1K");
        assert_eq!(parse_size("2g").unwrap_err(), "greater than 1G");
        assert!(parse_size("10x").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&["-b", "-B", "1m", "-t", "-1"]);
        let config = args.transfer_config(&TransferDefaults::default()).unwrap();
        assert!(config.binary);
        assert_eq!(config.bufsize, Some(1024 * 1024));
        assert_eq!(config.chunk_timeout(), None);
        assert!(!config.escape_chars.is_empty());
    }

    #[test]
    fn defaults_fill_missing_flags() {
        let defaults = TransferDefaults {
            overwrite: true,
            escape: true,
            ..TransferDefaults::default()
        };
        let config = parse(&[]).transfer_config(&defaults).unwrap();
        assert!(config.overwrite);
        assert!(!config.binary);
        assert_eq!(config.bufsize, Some(10 * 1024 * 1024));
        assert_eq!(config.timeout, Some(20));
        assert_eq!(config.escape_chars, EscapeTable::all());
    }

    #[test]
    fn bad_bufsize_flag_is_rejected() {
        let argv = ["trz", "-B", "512"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
