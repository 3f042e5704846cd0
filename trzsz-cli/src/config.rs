//! Configuration for `trz` / `tsz`, read from `~/.trzsz.toml` by default.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Transfer defaults; command-line flags take precedence.
    pub transfer: TransferDefaults,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Defaults for the transfer flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    /// Max chunk size, `N[b|k|m|g]` between 1K and 1G.
    pub bufsize: String,
    /// Seconds to wait for each chunk; zero or negative waits forever.
    pub timeout: i64,
    pub binary: bool,
    /// Escape all known control characters.
    pub escape: bool,
    pub overwrite: bool,
    pub quiet: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Log file path. Empty disables logging, since stdout and stderr
    /// belong to the transfer.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            bufsize: "10M".into(),
            timeout: 20,
            binary: false,
            escape: false,
            overwrite: false,
            quiet: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// `~/.trzsz.toml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".trzsz.toml"))
    }

    /// Load `path`, or the default location, falling back to defaults.
    ///
    /// Logging is not up yet at this point, so a file that exists but
    /// cannot be used is returned as a problem next to the defaults.
    pub fn load(path: Option<&Path>) -> (Self, Option<String>) {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load_file(&path),
            None => (Self::default(), None),
        }
    }

    fn load_file(path: &Path) -> (Self, Option<String>) {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return (Self::default(), None),
            Err(e) => {
                let problem = format!("cannot read config {}: {e}; using defaults", path.display());
                return (Self::default(), Some(problem));
            }
        };
        match toml::from_str(&contents) {
            Ok(config) => (config, None),
            Err(e) => {
                let problem = format!("invalid config {}: {e}; using defaults", path.display());
                (Self::default(), Some(problem))
            }
        }
    }

    /// Default configuration as TOML, for `--gen-config`.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
