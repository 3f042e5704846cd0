//! tsz: send files to the local terminal.
//!
//! ```text
//! tsz [options] file...     Send file(s)
//! tsz -d [options] path...  Send files and directories
//! tsz --gen-config          Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;

use trzsz_cli::args::TransferArgs;
use trzsz_cli::config::CliConfig;
use trzsz_cli::logging;
use trzsz_cli::session::ServerSession;
use trzsz_core::{TransferMode, check_paths_readable};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tsz", version, about = "Send file(s), similar to sz and compatible with tmux")]
struct Cli {
    #[command(flatten)]
    transfer: TransferArgs,

    /// File(s) to be sent
    #[arg(required_unless_present = "gen_config")]
    files: Vec<PathBuf>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let code = run(Cli::parse()).await;
    // stdin reads may still be parked in the blocking pool.
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    if cli.transfer.gen_config {
        return match CliConfig::default_toml() {
            Ok(text) => {
                println!("{text}");
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        };
    }

    let (config, problem) = CliConfig::load(cli.transfer.config.as_deref());
    if let Err(e) = logging::init(&config.logging, problem.as_deref()) {
        eprintln!("cannot open log file {}: {e}", config.logging.file);
        if let Some(problem) = &problem {
            eprintln!("{problem}");
        }
    }

    let mut transfer_config = match cli.transfer.transfer_config(&config.transfer) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let files = match check_paths_readable(cli.files, transfer_config.directory).await {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let session = ServerSession::start(TransferMode::Download, &mut transfer_config);
    if session.run_send(transfer_config, files).await {
        0
    } else {
        1
    }
}
