//! Transfer engine: handshake, file loops, exit and error reporting.
//!
//! # Session
//!
//! ```text
//! client (filter)                          server (trz / tsz)
//!      ◄──────────── magic key ────────────
//!      ──[ACT]──────────────────────────────►
//!      ◄─────────────────────────────[CFG]──
//!      ══ send_files ═══════ recv_files ═══   (either direction)
//!      ──[EXIT summary]─────────────────────►
//! ```
//!
//! Every request is answered by a `SUCC` echo of the value just sent, so
//! the reader never needs sequence numbers. A [`Transfer`] runs on one
//! task; the terminal side feeds it and stops it through the shared
//! [`TransferControl`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::codec::Encoder;
use tracing::{debug, error, warn};

use crate::buffer::{Chunk, StreamBuffer};
use crate::codec::{
    FrameCodec, OutboundFrame, WINDOWS_NEWLINE, Frame, decode_buffer, decode_string,
    encode_buffer, encode_string,
};
use crate::error::TrzszError;
use crate::file::FileReader;
use crate::output::strip_tmux_status_line;
use crate::protocol::{TransferAction, TransferConfig};
use crate::state::TransferPhase;

mod recv;
mod send;

/// Cleanup quiet period after an ordinary failure.
pub const DEFAULT_CLEAN_TIMEOUT: Duration = Duration::from_millis(100);

/// Cleanup quiet period after a receive timeout.
pub const TIMEOUT_CLEAN_TIMEOUT: Duration = Duration::from_millis(3000);

/// Lower bound of the cleanup quiet period after a user stop.
pub const MIN_STOP_CLEAN_TIMEOUT: Duration = Duration::from_millis(500);

/// Quiet period before the server prints its final message.
pub const EXIT_CLEAN_TIMEOUT: Duration = Duration::from_millis(500);

/// Sink for bytes going to the peer. Writes are fire-and-forget.
pub type PeerWriter = Arc<dyn Fn(Chunk) + Send + Sync>;

// ── TransferControl ──────────────────────────────────────────────

/// State shared between a running [`Transfer`] and the terminal side.
#[derive(Debug)]
pub struct TransferControl {
    buffer: StreamBuffer,
    stopped: AtomicBool,
    clean_timeout_ms: AtomicU64,
    max_chunk_ms: AtomicU64,
    last_input: Mutex<Instant>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            buffer: StreamBuffer::new(),
            stopped: AtomicBool::new(false),
            clean_timeout_ms: AtomicU64::new(DEFAULT_CLEAN_TIMEOUT.as_millis() as u64),
            max_chunk_ms: AtomicU64::new(0),
            last_input: Mutex::new(Instant::now()),
        }
    }

    /// Feed peer output. Ignored once stopped, but still counts as activity.
    pub fn add_received_data(&self, chunk: Chunk) {
        if !self.is_stopped() {
            self.buffer.add_chunk(chunk);
        }
        self.touch();
    }

    /// Stop the transfer; a pending read fails with `Stopped`.
    pub fn stop(&self) {
        self.set_clean_timeout((self.max_chunk_time() * 2).max(MIN_STOP_CLEAN_TIMEOUT));
        self.stopped.store(true, Ordering::SeqCst);
        self.buffer.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    /// Longest chunk round trip observed so far.
    fn max_chunk_time(&self) -> Duration {
        Duration::from_millis(self.max_chunk_ms.load(Ordering::SeqCst))
    }

    pub fn clean_timeout(&self) -> Duration {
        Duration::from_millis(self.clean_timeout_ms.load(Ordering::SeqCst))
    }

    fn set_clean_timeout(&self, timeout: Duration) {
        self.clean_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_chunk_time(&self, elapsed: Duration) {
        self.max_chunk_ms
            .fetch_max(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    fn touch(&self) {
        *self.last_input.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_input(&self) -> Instant {
        *self.last_input.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Transfer ─────────────────────────────────────────────────────

/// Local environment of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// The remote shell is a Windows console that re-renders its input.
    pub windows_shell: bool,
}

/// One transfer session, client or server side.
pub struct Transfer {
    control: Arc<TransferControl>,
    writer: PeerWriter,
    codec: FrameCodec,
    config: TransferConfig,
    phase: TransferPhase,
    windows_shell: bool,
    tmux_output_junk: bool,
    /// Readers handed to `send_files` and not closed yet.
    pending: VecDeque<Box<dyn FileReader>>,
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cut a noisy line at the expected frame marker.
///
/// With `any_frame`, a line without that marker is cut at its last `#`
/// instead, so an error frame behind tmux junk is still recognized.
fn cut_at_marker<'a>(line: &'a [u8], expect_type: &str, any_frame: bool) -> &'a [u8] {
    let marker = format!("#{expect_type}:");
    let found = line
        .windows(marker.len())
        .rposition(|w| w == marker.as_bytes())
        .or_else(|| {
            line.iter()
                .rposition(|&b| b == b'#')
                .filter(|&i| any_frame && i > 0)
        });
    match found {
        Some(idx) => &line[idx..],
        None => line,
    }
}

impl Transfer {
    pub fn new(control: Arc<TransferControl>, writer: PeerWriter, options: TransferOptions) -> Self {
        Self {
            control,
            writer,
            codec: FrameCodec::new(),
            config: TransferConfig::default(),
            phase: TransferPhase::default(),
            windows_shell: options.windows_shell,
            tmux_output_junk: false,
            pending: VecDeque::new(),
        }
    }

    pub fn control(&self) -> &Arc<TransferControl> {
        &self.control
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn phase(&self) -> &TransferPhase {
        &self.phase
    }

    pub fn newline(&self) -> &'static str {
        self.codec.newline()
    }

    // ── Sending ──────────────────────────────────────────────────

    fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), TrzszError> {
        let mut dst = BytesMut::new();
        self.codec.encode(frame, &mut dst)?;
        let chunk = match String::from_utf8(dst.to_vec()) {
            Ok(text) => Chunk::Text(text),
            Err(e) => Chunk::Binary(Bytes::from(e.into_bytes())),
        };
        (self.writer)(chunk);
        Ok(())
    }

    fn send_line(&mut self, typ: &'static str, payload: String) -> Result<(), TrzszError> {
        self.write_frame(OutboundFrame::Line { typ, payload })
    }

    fn send_integer(&mut self, typ: &'static str, value: u64) -> Result<(), TrzszError> {
        self.send_line(typ, value.to_string())
    }

    fn send_string(&mut self, typ: &'static str, value: &str) -> Result<(), TrzszError> {
        let payload = encode_string(value)?;
        self.send_line(typ, payload)
    }

    fn send_binary(&mut self, typ: &'static str, value: &[u8]) -> Result<(), TrzszError> {
        let payload = encode_buffer(value)?;
        self.send_line(typ, payload)
    }

    fn send_data(&mut self, data: Bytes) -> Result<(), TrzszError> {
        self.write_frame(OutboundFrame::Data(data))
    }

    // ── Receiving ────────────────────────────────────────────────

    async fn recv_line(&self, expect_type: &str, may_has_junk: bool) -> Result<Vec<u8>, TrzszError> {
        if self.control.is_stopped() {
            return Err(TrzszError::Stopped);
        }
        let buffer = self.control.buffer();
        if self.windows_shell {
            let line = buffer.read_line_on_windows().await?;
            return Ok(cut_at_marker(&line, expect_type, false).to_vec());
        }
        let mut line = buffer.read_line().await?.to_vec();
        if self.tmux_output_junk || may_has_junk {
            while line.last() == Some(&b'\r') {
                line.pop();
                line.extend_from_slice(&buffer.read_line().await?);
            }
            let cut = String::from_utf8_lossy(cut_at_marker(&line, expect_type, true)).into_owned();
            line = strip_tmux_status_line(&cut).into_bytes();
        }
        Ok(line)
    }

    /// Read the next frame and require its type to be `expect_type`.
    async fn recv_check(&self, expect_type: &str, may_has_junk: bool) -> Result<String, TrzszError> {
        let line = self.recv_line(expect_type, may_has_junk).await?;
        let frame = Frame::parse(&line)?;
        if frame.typ != expect_type {
            return Err(TrzszError::from_frame(&frame.typ, &frame.payload));
        }
        Ok(frame.payload)
    }

    async fn recv_integer(&self, typ: &str) -> Result<u64, TrzszError> {
        let payload = self.recv_check(typ, false).await?;
        payload
            .trim()
            .parse()
            .map_err(|_| TrzszError::ProtocolViolation(format!("invalid integer in {typ}: {payload}")))
    }

    async fn check_integer(&self, expected: u64) -> Result<(), TrzszError> {
        let actual = self.recv_integer("SUCC").await?;
        if actual != expected {
            return Err(TrzszError::IntegerCheck { actual, expected });
        }
        Ok(())
    }

    async fn recv_string(&self, typ: &str, may_has_junk: bool) -> Result<String, TrzszError> {
        decode_string(&self.recv_check(typ, may_has_junk).await?)
    }

    async fn recv_binary(&self, typ: &str) -> Result<Vec<u8>, TrzszError> {
        decode_buffer(&self.recv_check(typ, false).await?)
    }

    async fn check_binary(&self, expected: &[u8]) -> Result<(), TrzszError> {
        let actual = self.recv_binary("SUCC").await?;
        if actual != expected {
            return Err(TrzszError::BinaryCheck {
                actual: hex(&actual),
                expected: hex(expected),
            });
        }
        Ok(())
    }

    async fn read_data(&self) -> Result<Bytes, TrzszError> {
        if !self.codec.is_binary() {
            return Ok(Bytes::from(self.recv_binary("DATA").await?));
        }
        let size = self.recv_integer("DATA").await?;
        // Escaping at most doubles a chunk.
        let limit = self.config.max_buf_size().saturating_mul(2);
        let size = usize::try_from(size)
            .ok()
            .filter(|&n| n <= limit)
            .ok_or_else(|| TrzszError::ProtocolViolation(format!("DATA too large: {size}")))?;
        let raw = self.control.buffer().read_binary(size).await?;
        Ok(Bytes::from(self.codec.escape_table().unescape(&raw)))
    }

    /// Receive one content chunk, racing the configured chunk timeout.
    async fn recv_data(&self) -> Result<Bytes, TrzszError> {
        let Some(limit) = self.config.chunk_timeout() else {
            return self.read_data().await;
        };
        match tokio::time::timeout(limit, self.read_data()).await {
            Ok(result) => result,
            Err(_) => {
                self.control.set_clean_timeout(TIMEOUT_CLEAN_TIMEOUT);
                Err(TrzszError::ReceiveTimeout)
            }
        }
    }

    // ── Handshake ────────────────────────────────────────────────

    fn apply_config(&mut self, config: TransferConfig) {
        if config.binary {
            let codec = std::mem::take(&mut self.codec);
            self.codec = codec.with_binary(config.escape_chars.clone());
        }
        self.config = config;
    }

    /// Client: answer the magic key.
    pub async fn send_action(&mut self, confirm: bool, remote_is_windows: bool) -> Result<(), TrzszError> {
        self.phase.action_sent()?;
        let mut action = TransferAction::new(confirm);
        if self.windows_shell {
            action = action.for_windows_shell();
        }
        if remote_is_windows {
            self.codec.set_newline(WINDOWS_NEWLINE);
        }
        debug!(confirm, remote_is_windows, "sending action");
        self.send_string("ACT", &action.to_json()?)?;
        if !confirm {
            self.phase.exit()?;
        }
        Ok(())
    }

    /// Client: adopt the server's configuration.
    pub async fn recv_config(&mut self) -> Result<&TransferConfig, TrzszError> {
        let json = self.recv_string("CFG", true).await?;
        let config = TransferConfig::from_json(&json)?;
        debug!(?config, "received config");
        self.tmux_output_junk = config.tmux_output_junk;
        self.apply_config(config);
        self.phase.config_exchanged()?;
        Ok(&self.config)
    }

    /// Server: read the client's answer and adopt its newline.
    pub async fn recv_action(&mut self) -> Result<TransferAction, TrzszError> {
        self.phase.action_received()?;
        let json = self.recv_string("ACT", false).await?;
        let action = TransferAction::from_json(&json)?;
        if action.newline.as_deref() == Some(WINDOWS_NEWLINE) {
            self.codec.set_newline(WINDOWS_NEWLINE);
        }
        debug!(?action, "received action");
        if !action.confirm {
            self.phase.exit()?;
        }
        Ok(action)
    }

    /// Server: send the session configuration, restricted by the client's capabilities.
    pub async fn send_config(
        &mut self,
        mut config: TransferConfig,
        action: &TransferAction,
    ) -> Result<(), TrzszError> {
        if config.directory && !action.support_dir {
            return Err(TrzszError::User(
                "The client doesn't support transfer directory".into(),
            ));
        }
        if !action.allows_binary() {
            config.binary = false;
        }
        config.lang = Some("rs".into());
        self.send_string("CFG", &config.to_json()?)?;
        self.apply_config(config);
        self.phase.config_exchanged()
    }

    // ── Exit ─────────────────────────────────────────────────────

    /// Client: finish the session with a summary for the server to print.
    pub async fn client_exit(&mut self, message: &str) -> Result<(), TrzszError> {
        self.send_string("EXIT", message)?;
        self.phase.exit()
    }

    /// Server: wait for the client's summary.
    pub async fn recv_exit(&mut self) -> Result<String, TrzszError> {
        let message = self.recv_string("EXIT", false).await?;
        self.phase.exit()?;
        Ok(message)
    }

    /// Server: let the terminal settle, then print `message`.
    pub async fn server_exit(&mut self, message: &str) {
        self.clean_input(EXIT_CLEAN_TIMEOUT).await;
        (self.writer)(Chunk::Text(format!("{message}\r\n")));
    }

    /// Drop all input until `timeout` passed without any.
    async fn clean_input(&self, timeout: Duration) {
        self.control.stopped.store(true, Ordering::SeqCst);
        self.control.buffer().drain();
        self.control.touch();
        loop {
            let idle = self.control.last_input().elapsed();
            if idle >= timeout {
                return;
            }
            tokio::time::sleep(timeout - idle).await;
        }
    }

    fn report_error(&mut self, err: &TrzszError) {
        let typ = if err.is_trace_back() { "FAIL" } else { "fail" };
        if let Err(e) = self.send_string(typ, &err.to_string()) {
            warn!("failed to report error to peer: {e}");
        }
    }

    /// Client: drain, then report `err` unless the server already ended the session.
    pub async fn client_error(&mut self, err: &TrzszError) {
        self.clean_input(self.control.clean_timeout()).await;
        self.phase.fail();
        if err.is_remote_exit() {
            return;
        }
        if !err.is_remote_fail() {
            self.report_error(err);
        }
        if err.is_trace_back() {
            error!("transfer failed: {err}");
        }
    }

    /// Server: drain, then report `err` unless the client already ended the session.
    ///
    /// Returns the message to show locally, if any.
    pub async fn server_error(&mut self, err: &TrzszError) -> Option<String> {
        self.clean_input(self.control.clean_timeout()).await;
        self.phase.fail();
        if err.is_remote_exit() || err.is_remote_fail() {
            if err.is_trace_back() {
                error!("peer failed: {err}");
                return Some(err.to_string());
            }
            return None;
        }
        self.report_error(err);
        if err.is_trace_back() {
            error!("transfer failed: {err}");
        }
        Some(err.to_string())
    }

    /// Close every reader that a failed `send_files` left open.
    pub async fn cleanup(&mut self) {
        while let Some(mut reader) = self.pending.pop_front() {
            if let Err(e) = reader.close().await {
                warn!("failed to close {}: {e}", reader.file_name());
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
