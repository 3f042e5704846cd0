//! Remote-shell side of a transfer: announce, pump stdio, run the engine.
//!
//! ```text
//!   stdin ──► reader task ──► TransferControl ──► Transfer
//!                                                   │
//!   stdout ◄── writer task ◄── mpsc<Chunk> ◄── PeerWriter
//! ```

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use trzsz_core::magic::unique_id;
use trzsz_core::{
    Chunk, FileReader, LocalSaveTarget, MagicKey, PeerWriter, TRZSZ_VERSION, Transfer, TransferConfig,
    TransferControl, TransferMode, TransferOptions, TrzszError,
};

const SUFFIX_NORMAL: u8 = 0;
const SUFFIX_WINDOWS: u8 = 10;
const SUFFIX_TMUX: u8 = 20;

// ── Raw mode ─────────────────────────────────────────────────────

/// Raw mode on stdin for the lifetime of the guard, if stdin is a terminal.
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn enable() -> Self {
        if !std::io::stdin().is_terminal() {
            return Self { enabled: false };
        }
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                warn!("failed to enable raw mode: {e}");
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A running server-side transfer bound to this process' stdio.
pub struct ServerSession {
    transfer: Transfer,
    output: mpsc::UnboundedSender<Chunk>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    _raw_mode: RawModeGuard,
}

fn unique_suffix(tmux: bool) -> u8 {
    if cfg!(windows) {
        SUFFIX_WINDOWS
    } else if tmux {
        SUFFIX_TMUX
    } else {
        SUFFIX_NORMAL
    }
}

/// Mark the session as running under tmux, whose status line redraws into
/// the output, and tell the client how wide the pane is.
fn apply_tmux(config: &mut TransferConfig, tmux: bool, size: Option<(u16, u16)>) {
    config.tmux_output_junk = tmux;
    config.tmux_pane_width = if tmux {
        size.map(|(columns, _)| u32::from(columns)).filter(|&w| w > 0)
    } else {
        None
    };
}

/// The line that makes the terminal-side filter start a transfer.
pub fn magic_line(mode: TransferMode, millis: u64, tmux: bool) -> String {
    let id = unique_id(millis, unique_suffix(tmux));
    format!("\x1b7\x07{}\r\n", MagicKey::format(mode, TRZSZ_VERSION, &id))
}

impl ServerSession {
    /// Announce `mode` on stdout and start pumping stdio.
    pub fn start(mode: TransferMode, config: &mut TransferConfig) -> Self {
        let tmux = std::env::var_os("TMUX").is_some();
        let size = if tmux { crossterm::terminal::size().ok() } else { None };
        apply_tmux(config, tmux, size);

        let (output, mut output_rx) = mpsc::unbounded_channel::<Chunk>();
        let writer_task = tokio::spawn(async move {
            let mut stdout = FramedWrite::new(tokio::io::stdout(), BytesCodec::new());
            while let Some(chunk) = output_rx.recv().await {
                if let Err(e) = stdout.send(chunk.into_bytes()).await {
                    warn!("stdout write error: {e}");
                    break;
                }
            }
        });

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let _ = output.send(Chunk::Text(magic_line(mode, millis, tmux)));
        info!(mode = %mode.as_char(), tmux, "transfer announced");

        let raw_mode = RawModeGuard::enable();
        let control = Arc::new(TransferControl::new());
        let reader_task = tokio::spawn({
            let control = control.clone();
            async move {
                let mut stdin = FramedRead::new(tokio::io::stdin(), BytesCodec::new());
                while let Some(result) = stdin.next().await {
                    match result {
                        Ok(data) => control.add_received_data(Chunk::Binary(data.freeze())),
                        Err(e) => {
                            warn!("stdin read error: {e}");
                            break;
                        }
                    }
                }
                debug!("stdin closed");
            }
        });

        let writer: PeerWriter = {
            let output = output.clone();
            Arc::new(move |chunk| {
                let _ = output.send(chunk);
            })
        };
        let options = TransferOptions {
            windows_shell: cfg!(windows),
        };
        Self {
            transfer: Transfer::new(control, writer, options),
            output,
            writer_task,
            reader_task,
            _raw_mode: raw_mode,
        }
    }

    /// Receive files into `target` (`trz`).
    pub async fn run_receive(mut self, config: TransferConfig, mut target: LocalSaveTarget) -> bool {
        let result: Result<(), TrzszError> = async {
            let action = self.transfer.recv_action().await?;
            if !action.confirm {
                self.transfer.server_exit("Cancelled").await;
                return Ok(());
            }
            self.transfer.send_config(config, &action).await?;
            let names = self.transfer.recv_files(&mut target, None).await?;
            info!(count = names.len(), "files received");
            let message = self.transfer.recv_exit().await?;
            self.transfer.server_exit(&message).await;
            Ok(())
        }
        .await;
        self.finish(result).await
    }

    /// Send already opened `files` (`tsz`).
    pub async fn run_send(mut self, config: TransferConfig, files: Vec<Box<dyn FileReader>>) -> bool {
        let result: Result<(), TrzszError> = async {
            let action = self.transfer.recv_action().await?;
            if !action.confirm {
                self.transfer.server_exit("Cancelled").await;
                return Ok(());
            }
            self.transfer.send_config(config, &action).await?;
            let names = self.transfer.send_files(files, None).await?;
            info!(count = names.len(), "files sent");
            let message = self.transfer.recv_exit().await?;
            self.transfer.server_exit(&message).await;
            Ok(())
        }
        .await;
        self.finish(result).await
    }

    async fn finish(mut self, result: Result<(), TrzszError>) -> bool {
        let ok = match result {
            Ok(()) => true,
            Err(err) => {
                self.transfer.cleanup().await;
                if let Some(message) = self.transfer.server_error(&err).await {
                    let _ = self.output.send(Chunk::Text(format!("{message}\r\n")));
                }
                false
            }
        };
        self.reader_task.abort();
        let Self {
            transfer,
            output,
            writer_task,
            ..
        } = self;
        drop(transfer);
        drop(output);
        if let Err(e) = writer_task.await {
            warn!("writer task failed: {e}");
        }
        ok
    }
}

// ── Tests ────────────────────────────────────────────────────────
