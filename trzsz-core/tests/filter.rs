//! Integration tests: the filter driving whole transfers against a
//! server engine standing in for the remote `trz` / `tsz`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;
use trzsz_core::magic::unique_id;
use trzsz_core::{
    Chunk, FilterHost, FilterOptions, LocalSaveTarget, MagicKey, PeerWriter, ProgressCallback,
    TRZSZ_VERSION, Transfer, TransferConfig, TransferControl, TransferMode, TransferOptions,
    TrzszError, TrzszFilter, check_paths_readable,
};

// ── Helpers ──────────────────────────────────────────────────────

/// Terminal side: records rendered output, hands keystrokes to the "shell".
struct TestHost {
    terminal: Mutex<Vec<u8>>,
    shell: mpsc::UnboundedSender<Chunk>,
    save_dir: Option<PathBuf>,
    send_files: Option<Vec<PathBuf>>,
    /// `(quiet, tmux_pane_width)` of every progress bar the filter asked for.
    progress_requests: Mutex<Vec<(bool, Option<u32>)>>,
    progress_events: Arc<Mutex<Vec<String>>>,
}

struct RecordingProgress(Arc<Mutex<Vec<String>>>);

impl ProgressCallback for RecordingProgress {
    fn on_file_count(&mut self, count: u64) {
        self.0.lock().unwrap().push(format!("count {count}"));
    }

    fn on_file_name(&mut self, name: &str) {
        self.0.lock().unwrap().push(format!("name {name}"));
    }

    fn on_file_done(&mut self) {
        self.0.lock().unwrap().push("done".into());
    }
}

#[async_trait]
impl FilterHost for TestHost {
    fn write_to_terminal(&self, output: Chunk) {
        self.terminal
            .lock()
            .unwrap()
            .extend_from_slice(output.as_bytes());
    }

    fn send_to_server(&self, input: Chunk) {
        let _ = self.shell.send(input);
    }

    async fn choose_send_files(&self, _directory: bool) -> Option<Vec<PathBuf>> {
        self.send_files.clone()
    }

    async fn choose_save_directory(&self) -> Option<PathBuf> {
        self.save_dir.clone()
    }

    fn create_progress(
        &self,
        quiet: bool,
        tmux_pane_width: Option<u32>,
    ) -> Option<Box<dyn ProgressCallback>> {
        self.progress_requests
            .lock()
            .unwrap()
            .push((quiet, tmux_pane_width));
        Some(Box::new(RecordingProgress(self.progress_events.clone())))
    }
}

struct Session {
    filter: TrzszFilter,
    host: Arc<TestHost>,
    shell: mpsc::UnboundedReceiver<Chunk>,
}

fn session(save_dir: Option<PathBuf>, send_files: Option<Vec<PathBuf>>) -> Session {
    let (tx, rx) = mpsc::unbounded_channel();
    let host = Arc::new(TestHost {
        terminal: Mutex::new(Vec::new()),
        shell: tx,
        save_dir,
        send_files,
        progress_requests: Mutex::new(Vec::new()),
        progress_events: Arc::new(Mutex::new(Vec::new())),
    });
    let filter = TrzszFilter::new(host.clone(), FilterOptions::default());
    Session {
        filter,
        host,
        shell: rx,
    }
}

fn magic_key(mode: TransferMode) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;
    format!(
        "{}\r\n",
        MagicKey::format(mode, TRZSZ_VERSION, &unique_id(millis, 0))
    )
}

/// Server engine whose output goes through the filter and whose input is
/// whatever the filter sends to the shell from now on.
fn remote(session: &mut Session) -> Transfer {
    let control = Arc::new(TransferControl::new());
    let mut shell = std::mem::replace(&mut session.shell, mpsc::unbounded_channel().1);
    tokio::spawn({
        let control = control.clone();
        async move {
            while let Some(chunk) = shell.recv().await {
                control.add_received_data(chunk);
            }
        }
    });
    let writer: PeerWriter = {
        let filter = session.filter.clone();
        Arc::new(move |chunk| filter.process_server_output(chunk))
    };
    Transfer::new(control, writer, TransferOptions::default())
}

fn terminal_text(host: &TestHost) -> String {
    String::from_utf8_lossy(&host.terminal.lock().unwrap()).into_owned()
}

// ── Download (tsz) ───────────────────────────────────────────────

#[tokio::test]
async fn test_download_through_filter() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.txt"), b"test content\n").unwrap();

    let mut session = session(Some(dst.path().to_path_buf()), None);
    let mut server = remote(&mut session);
    let key = magic_key(TransferMode::Download);
    session.filter.process_server_output(key.clone());
    assert!(session.filter.is_transferring_files());

    let files = check_paths_readable(vec![src.path().join("a.txt")], false)
        .await
        .unwrap();
    let result: Result<(), TrzszError> = async {
        let action = server.recv_action().await?;
        assert!(action.confirm);
        server.send_config(TransferConfig::default(), &action).await?;
        server.send_files(files, None).await?;
        let message = server.recv_exit().await?;
        server.server_exit(&message).await;
        Ok(())
    }
    .await;
    result.unwrap();

    assert!(!session.filter.is_transferring_files());
    assert_eq!(
        std::fs::read(dst.path().join("a.txt")).unwrap(),
        b"test content\n"
    );
    let text = terminal_text(&session.host);
    let dest = LocalSaveTarget::new(dst.path()).unwrap();
    assert!(text.starts_with(&key));
    assert!(text.ends_with(&format!(
        "Saved 1 file/directory to {}\r\n- a.txt\r\n",
        dest.root().display()
    )));
}

#[tokio::test]
async fn test_download_cancelled() {
    let mut session = session(None, None);
    let mut server = remote(&mut session);
    session
        .filter
        .process_server_output(magic_key(TransferMode::Download));
    let action = server.recv_action().await.unwrap();
    assert!(!action.confirm);
    server.server_exit("Cancelled").await;
    assert!(terminal_text(&session.host).ends_with("Cancelled\r\n"));
}

// ── Upload (trz) ─────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_files_through_filter() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("up.txt"), b"uploaded").unwrap();

    let mut session = session(None, None);
    let upload = tokio::spawn({
        let filter = session.filter.clone();
        let path = src.path().join("up.txt");
        async move { filter.upload_files(vec![path]).await }
    });
    assert_eq!(session.shell.recv().await, Some(Chunk::from("\x03")));
    assert_eq!(session.shell.recv().await, Some(Chunk::from("trz\r")));
    session.filter.process_server_output("trz\r\n");
    session
        .filter
        .process_server_output(magic_key(TransferMode::Upload));

    let mut server = remote(&mut session);
    let mut target = LocalSaveTarget::new(dst.path()).unwrap();
    let action = server.recv_action().await.unwrap();
    server
        .send_config(TransferConfig::default(), &action)
        .await
        .unwrap();
    let names = server.recv_files(&mut target, None).await.unwrap();
    assert_eq!(names, vec!["up.txt".to_string()]);
    let message = server.recv_exit().await.unwrap();
    assert_eq!(message, "Saved 1 file/directory\r\n- up.txt");

    upload.await.unwrap().unwrap();
    assert_eq!(std::fs::read(dst.path().join("up.txt")).unwrap(), b"uploaded");
    let text = terminal_text(&session.host);
    assert!(text.starts_with("\r\n::TRZSZ:TRANSFER:R:"));
}

#[tokio::test]
async fn test_upload_directory_from_dialog() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let root = src.path().join("docs");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("readme.md"), b"# docs\n").unwrap();

    let mut session = session(None, Some(vec![root]));
    let mut server = remote(&mut session);
    session
        .filter
        .process_server_output(magic_key(TransferMode::UploadDirectory));

    let mut target = LocalSaveTarget::new(dst.path()).unwrap();
    let action = server.recv_action().await.unwrap();
    let config = TransferConfig {
        directory: true,
        ..TransferConfig::default()
    };
    server.send_config(config, &action).await.unwrap();
    let names = server.recv_files(&mut target, None).await.unwrap();
    assert_eq!(names, vec!["docs".to_string()]);
    server.recv_exit().await.unwrap();
    assert_eq!(
        std::fs::read(dst.path().join("docs/readme.md")).unwrap(),
        b"# docs\n"
    );
    assert_eq!(
        *session.host.progress_events.lock().unwrap(),
        vec!["count 2", "name docs", "name readme.md", "done"]
    );
}

#[tokio::test]
async fn test_download_progress_gets_pane_width() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("b.txt"), b"bbb").unwrap();

    let mut session = session(Some(dst.path().to_path_buf()), None);
    let mut server = remote(&mut session);
    session
        .filter
        .process_server_output(magic_key(TransferMode::Download));

    let files = check_paths_readable(vec![src.path().join("b.txt")], false)
        .await
        .unwrap();
    let action = server.recv_action().await.unwrap();
    let config = TransferConfig {
        quiet: true,
        tmux_pane_width: Some(88),
        ..TransferConfig::default()
    };
    server.send_config(config, &action).await.unwrap();
    server.send_files(files, None).await.unwrap();
    server.recv_exit().await.unwrap();

    assert_eq!(
        *session.host.progress_requests.lock().unwrap(),
        vec![(true, Some(88))]
    );
    assert_eq!(
        *session.host.progress_events.lock().unwrap(),
        vec!["count 1", "name b.txt", "done"]
    );
}

#[tokio::test]
async fn test_upload_rejected_while_transferring() {
    let mut session = session(None, None);
    let _server = remote(&mut session);
    session
        .filter
        .process_server_output(magic_key(TransferMode::Upload));
    let err = session.filter.upload_files(Vec::new()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "The previous upload has not been completed yet"
    );
}
