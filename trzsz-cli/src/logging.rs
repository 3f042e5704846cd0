//! Log setup. Logs only ever go to a file.

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber, then report `config_problem`.
///
/// Without a log file nothing is installed and the problem goes to stderr,
/// which is still free before the transfer is announced.
pub fn init(config: &LoggingConfig, config_problem: Option<&str>) -> io::Result<()> {
    if config.file.is_empty() {
        if let Some(problem) = config_problem {
            eprintln!("{problem}");
        }
        return Ok(());
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    if let Some(problem) = config_problem {
        warn!("{problem}");
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;

    // The only test that installs the global subscriber.
    #[test]
    fn invalid_config_is_logged_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("trzsz.toml");
        std::fs::write(&bad, "[transfer]\ntimeout = \"soon\"\n").unwrap();
        let log = dir.path().join("trzsz.log");

        let (mut config, problem) = CliConfig::load(Some(&bad));
        config.logging.file = log.to_string_lossy().into_owned();
        config.logging.level = "warn".into();
        init(&config.logging, problem.as_deref()).unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("WARN"));
        assert!(text.contains("invalid config "));
        assert!(text.contains("using defaults"));
    }
}
