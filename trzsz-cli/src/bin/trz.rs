//! trz: receive files from the local terminal.
//!
//! ```text
//! trz [options] [path]     Save uploaded file(s) into path (default: .)
//! trz -d [options] [path]  Also accept directories
//! trz --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;

use trzsz_cli::args::TransferArgs;
use trzsz_cli::config::CliConfig;
use trzsz_cli::logging;
use trzsz_cli::session::ServerSession;
use trzsz_core::{LocalSaveTarget, TransferMode};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "trz", version, about = "Receive file(s), similar to rz and compatible with tmux")]
struct Cli {
    #[command(flatten)]
    transfer: TransferArgs,

    /// Path to save file(s)
    #[arg(default_value = ".")]
    path: PathBuf,
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
    let target = match LocalSaveTarget::new(&cli.path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let mode = if transfer_config.directory {
        TransferMode::UploadDirectory
    } else {
        TransferMode::Upload
    };
    let session = ServerSession::start(mode, &mut transfer_config);
    if session.run_receive(transfer_config, target).await {
        0
    } else {
        1
    }
}
