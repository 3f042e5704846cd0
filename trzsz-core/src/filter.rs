//! Terminal filter: transparent pass-through with transfer takeover.
//!
//! ```text
//!   keyboard ──► process_terminal_input ──► send_to_server ──► remote shell
//!                        │ (swallowed while transferring, Ctrl-C stops)
//!   terminal ◄── write_to_terminal ◄── process_server_output ◄── remote shell
//!                        │ magic key
//!                        ▼
//!              spawned transfer task ◄── TransferControl (fed with output)
//! ```
//!
//! The filter holds no lock across an await; a transfer runs on its own
//! task and the filter only talks to it through [`TransferControl`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::buffer::{Chunk, INTERRUPT_BYTE};
use crate::error::TrzszError;
use crate::file::{
    FileReader, LocalSaveTarget, SaveTarget, check_duplicate_names, check_paths_readable,
};
use crate::magic::{MagicKey, MagicKeyDetector, TransferMode, UniqueIdCache};
use crate::output::{format_saved_files, strip_server_output};
use crate::progress::ProgressCallback;
use crate::transfer::{PeerWriter, Transfer, TransferControl, TransferOptions};

/// How long `upload_files` waits for the remote `trz` to announce itself.
pub const DRAG_INIT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Pause between the interrupt and the injected `trz` command.
const UPLOAD_SETTLE_DELAY: Duration = Duration::from_millis(200);

// ── FilterHost ───────────────────────────────────────────────────

/// Integration points supplied by the embedding terminal.
#[async_trait]
pub trait FilterHost: Send + Sync + 'static {
    /// Render server output.
    fn write_to_terminal(&self, output: Chunk);

    /// Transmit to the remote shell.
    fn send_to_server(&self, input: Chunk);

    /// File picker; `None` when the user cancelled.
    async fn choose_send_files(&self, directory: bool) -> Option<Vec<PathBuf>>;

    /// Directory picker; `None` when the user cancelled.
    async fn choose_save_directory(&self) -> Option<PathBuf>;

    /// Resolve picked paths into readers.
    async fn select_send_files(
        &self,
        paths: Vec<PathBuf>,
        directory: bool,
    ) -> Result<Vec<Box<dyn FileReader>>, TrzszError> {
        check_paths_readable(paths, directory).await
    }

    /// Open the destination picked by [`FilterHost::choose_save_directory`].
    async fn open_save_target(&self, dir: PathBuf) -> Result<Box<dyn SaveTarget>, TrzszError> {
        Ok(Box::new(LocalSaveTarget::new(dir)?))
    }

    /// Progress renderer for one transfer, if the host draws one.
    fn create_progress(
        &self,
        _quiet: bool,
        _tmux_pane_width: Option<u32>,
    ) -> Option<Box<dyn ProgressCallback>> {
        None
    }
}

// ── TrzszFilter ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    /// The remote shell is a Windows console.
    pub windows_shell: bool,
    pub drag_init_timeout: Duration,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            windows_shell: false,
            drag_init_timeout: DRAG_INIT_TIMEOUT,
        }
    }
}

/// An upload started by [`TrzszFilter::upload_files`], waiting for its key.
struct PendingUpload {
    files: Option<Vec<Box<dyn FileReader>>>,
    done: Option<oneshot::Sender<Result<(), TrzszError>>>,
}

#[derive(Default)]
struct FilterState {
    transfer: Option<Arc<TransferControl>>,
    detector: MagicKeyDetector,
    unique_ids: UniqueIdCache,
    upload: Option<PendingUpload>,
    /// Swallow output while the shell reacts to the injected Ctrl-C.
    upload_interrupting: bool,
    /// Hide the echo of the injected `trz` command.
    upload_skip_trz_command: bool,
}

struct FilterInner {
    host: Arc<dyn FilterHost>,
    options: FilterOptions,
    state: Mutex<FilterState>,
}

/// Client side of trzsz, sitting between a terminal and a remote shell.
///
/// Cheap to clone; clones share one session. Must be used inside a tokio
/// runtime since detected transfers are spawned onto it.
#[derive(Clone)]
pub struct TrzszFilter {
    inner: Arc<FilterInner>,
}

impl TrzszFilter {
    pub fn new(host: Arc<dyn FilterHost>, options: FilterOptions) -> Self {
        Self {
            inner: Arc::new(FilterInner {
                host,
                options,
                state: Mutex::new(FilterState::default()),
            }),
        }
    }

    /// Handle output of the remote shell.
    pub fn process_server_output(&self, output: impl Into<Chunk>) {
        let output = output.into();
        let detected = {
            let mut state = self.inner.lock();
            if let Some(control) = &state.transfer {
                control.add_received_data(output);
                return;
            }
            if state.upload_interrupting {
                return;
            }
            if state.upload_skip_trz_command {
                state.upload_skip_trz_command = false;
                if matches!(
                    strip_server_output(output.as_bytes()).as_deref(),
                    Some("trz" | "trz -d")
                ) {
                    drop(state);
                    self.inner.host.write_to_terminal(Chunk::from("\r\n"));
                    return;
                }
            }
            self.inner.detect(&mut state, &output)
        };
        self.inner.host.write_to_terminal(output);
        if let Some((key, control)) = detected {
            let inner = self.inner.clone();
            tokio::spawn(inner.run_transfer(key, control));
        }
    }

    /// Handle keyboard input.
    pub fn process_terminal_input(&self, input: &str) {
        self.process_input(Chunk::from(input));
    }

    /// Handle binary input such as a pasted blob or mouse report.
    pub fn process_binary_input(&self, input: &[u8]) {
        self.process_input(Chunk::from(input.to_vec()));
    }

    fn process_input(&self, input: Chunk) {
        let transfer = self.inner.lock().transfer.clone();
        match transfer {
            Some(control) => {
                if input.as_bytes() == [INTERRUPT_BYTE] {
                    control.stop();
                }
            }
            None => self.inner.host.send_to_server(input),
        }
    }

    pub fn is_transferring_files(&self) -> bool {
        self.inner.lock().transfer.is_some()
    }

    pub fn stop_transferring_files(&self) {
        if let Some(control) = self.inner.lock().transfer.clone() {
            control.stop();
        }
    }

    /// Upload `paths` by running `trz` in the remote shell.
    ///
    /// Resolves when the transfer ends, or fails with "Upload does not
    /// start" if no transfer claimed the files within the grace period.
    pub async fn upload_files(&self, paths: Vec<PathBuf>) -> Result<(), TrzszError> {
        self.inner.check_upload_idle()?;
        let files = self.inner.host.select_send_files(paths, true).await?;
        if files.is_empty() {
            return Err("No files to upload".into());
        }
        let directory = files.iter().any(|f| f.is_dir() || f.rel_path().len() > 1);

        let (done_tx, mut done_rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            if state.transfer.is_some() || state.upload.is_some() {
                return Err(previous_upload());
            }
            state.upload = Some(PendingUpload {
                files: Some(files),
                done: Some(done_tx),
            });
            state.upload_interrupting = true;
        }

        let host = &self.inner.host;
        host.send_to_server(Chunk::from("\x03"));
        tokio::time::sleep(UPLOAD_SETTLE_DELAY).await;
        {
            let mut state = self.inner.lock();
            state.upload_interrupting = false;
            state.upload_skip_trz_command = true;
        }
        host.send_to_server(Chunk::from(if directory { "trz -d\r" } else { "trz\r" }));

        tokio::select! {
            result = &mut done_rx => return result.unwrap_or_else(|_| Err(not_started())),
            _ = tokio::time::sleep(self.inner.options.drag_init_timeout) => {}
        }
        {
            let mut state = self.inner.lock();
            if state.upload.as_ref().is_some_and(|u| u.files.is_some()) {
                state.upload = None;
                state.upload_skip_trz_command = false;
                return Err(not_started());
            }
        }
        done_rx.await.unwrap_or_else(|_| Err(not_started()))
    }
}

fn previous_upload() -> TrzszError {
    "The previous upload has not been completed yet".into()
}

fn not_started() -> TrzszError {
    "Upload does not start".into()
}

// ── Transfer task ────────────────────────────────────────────────

impl FilterInner {
    fn lock(&self) -> MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_upload_idle(&self) -> Result<(), TrzszError> {
        let state = self.lock();
        if state.transfer.is_some() || state.upload.is_some() {
            return Err(previous_upload());
        }
        Ok(())
    }

    /// Look for a new magic key and claim the session for it.
    fn detect(
        &self,
        state: &mut FilterState,
        output: &Chunk,
    ) -> Option<(MagicKey, Arc<TransferControl>)> {
        let key = state.detector.detect(output.as_bytes())?;
        if let Some(id) = &key.unique_id {
            if state.unique_ids.check(id, self.options.windows_shell) {
                debug!(unique_id = %id, "ignoring repeated magic key");
                return None;
            }
        }
        let control = Arc::new(TransferControl::new());
        state.transfer = Some(control.clone());
        Some((key, control))
    }

    async fn run_transfer(self: Arc<Self>, key: MagicKey, control: Arc<TransferControl>) {
        info!(mode = ?key.mode, version = %key.version, "transfer requested");
        let writer: PeerWriter = {
            let host = self.host.clone();
            Arc::new(move |chunk| host.send_to_server(chunk))
        };
        let options = TransferOptions {
            windows_shell: self.options.windows_shell,
        };
        let mut transfer = Transfer::new(control, writer, options);
        let remote_is_windows = key.remote_is_windows();
        let result = match key.mode {
            TransferMode::Download => self.download(&mut transfer, remote_is_windows).await,
            TransferMode::Upload => self.upload(&mut transfer, false, remote_is_windows).await,
            TransferMode::UploadDirectory => {
                self.upload(&mut transfer, true, remote_is_windows).await
            }
        };
        if let Err(e) = &result {
            transfer.client_error(e).await;
        }
        transfer.cleanup().await;

        let upload = {
            let mut state = self.lock();
            state.transfer = None;
            state.upload_interrupting = false;
            state.detector.reset();
            state.upload.take()
        };
        if let Some(done) = upload.and_then(|u| u.done) {
            let _ = done.send(result);
        }
    }

    async fn download(&self, transfer: &mut Transfer, remote_is_windows: bool) -> Result<(), TrzszError> {
        let Some(dir) = self.host.choose_save_directory().await else {
            return transfer.send_action(false, remote_is_windows).await;
        };
        let mut target = self.host.open_save_target(dir).await?;
        transfer.send_action(true, remote_is_windows).await?;
        let config = transfer.recv_config().await?.clone();

        let mut progress = self.host.create_progress(config.quiet, config.tmux_pane_width);
        let progress = progress.as_mut().map(|p| p.as_mut() as &mut dyn ProgressCallback);
        let names = transfer.recv_files(target.as_mut(), progress).await?;
        let destination = target.destination();
        transfer
            .client_exit(&format_saved_files(&names, destination.as_deref()))
            .await
    }

    async fn upload(
        &self,
        transfer: &mut Transfer,
        directory: bool,
        remote_is_windows: bool,
    ) -> Result<(), TrzszError> {
        let preselected = self.lock().upload.as_mut().and_then(|u| u.files.take());
        let files = match preselected {
            Some(files) => files,
            None => match self.host.choose_send_files(directory).await {
                Some(paths) if !paths.is_empty() => {
                    self.host.select_send_files(paths, directory).await?
                }
                _ => return transfer.send_action(false, remote_is_windows).await,
            },
        };
        transfer.send_action(true, remote_is_windows).await?;
        let config = transfer.recv_config().await?.clone();
        if config.overwrite {
            check_duplicate_names(&files)?;
        }

        let mut progress = self.host.create_progress(config.quiet, config.tmux_pane_width);
        let progress = progress.as_mut().map(|p| p.as_mut() as &mut dyn ProgressCallback);
        let names = transfer.send_files(files, progress).await?;
        transfer.client_exit(&format_saved_files(&names, None)).await
    }
}

// ── Tests ────────────────────────────────────────────────────────
