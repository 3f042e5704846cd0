//! Streaming buffer: turns pushed output chunks into pulled lines and blocks.
//!
//! The terminal side pushes chunks with [`StreamBuffer::add_chunk`] as they
//! arrive; the protocol side awaits [`StreamBuffer::read_line`],
//! [`StreamBuffer::read_line_on_windows`] or [`StreamBuffer::read_binary`].
//! A read suspends on a [`Notify`] until enough data is queued, the buffer
//! is stopped, or an interrupt byte shows up.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::TrzszError;

/// Ctrl-C as it appears on the wire.
pub const INTERRUPT_BYTE: u8 = 0x03;

const ESC: u8 = 0x1b;

/// `read_binary` grows past this only as bytes actually arrive.
const MAX_BINARY_PREALLOC: usize = 64 * 1024;

// ── Chunk ────────────────────────────────────────────────────────

/// A piece of terminal traffic, either decoded text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Binary(Bytes),
}

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Text(s) => s.as_bytes(),
            Chunk::Binary(b) => b,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Chunk::Text(s) => Bytes::from(s.into_bytes()),
            Chunk::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Text(s.to_string())
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Text(s)
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Binary(b)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Binary(Bytes::from(v))
    }
}

// ── StreamBuffer ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BufferState {
    chunks: VecDeque<Chunk>,
    /// Unconsumed remainder of the chunk being read.
    current: Bytes,
    stopped: bool,
}

impl BufferState {
    fn take_next(&mut self) -> Option<Bytes> {
        if !self.current.is_empty() {
            return Some(std::mem::take(&mut self.current));
        }
        while let Some(chunk) = self.chunks.pop_front() {
            let bytes = chunk.into_bytes();
            if !bytes.is_empty() {
                return Some(bytes);
            }
        }
        None
    }
}

/// Chunk queue with async line and block readers.
///
/// Shared between the producer (terminal output) and a single consumer
/// (the transfer engine). All methods take `&self`.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

/// Per-line state of the Windows console line reader.
#[derive(Debug, Default)]
struct WindowsLineState {
    line: Vec<u8>,
    in_escape: bool,
    escape_prev: u8,
    may_duplicate: bool,
    has_cursor_home: bool,
    pre_has_cursor_home: bool,
    has_newline: bool,
}

impl WindowsLineState {
    /// Feed one byte; returns `true` when the line is complete.
    fn feed(&mut self, b: u8) -> bool {
        if self.in_escape {
            if b.is_ascii_alphabetic() {
                self.in_escape = false;
                if b == b'H' {
                    if self.escape_prev.is_ascii_digit() {
                        self.may_duplicate = true;
                    } else if self.escape_prev == b'[' {
                        self.has_cursor_home = true;
                    }
                }
            }
            self.escape_prev = b;
            return false;
        }
        match b {
            ESC => {
                self.in_escape = true;
                self.escape_prev = b;
                false
            }
            b'\n' => {
                self.has_newline = true;
                false
            }
            b'!' if !self.line.is_empty() => true,
            b'!' => false,
            0x21..=0x7e => {
                self.append(b);
                false
            }
            _ => false,
        }
    }

    fn append(&mut self, b: u8) {
        let duplicate = self.may_duplicate
            && self.has_newline
            && self
                .line
                .last()
                .is_some_and(|&last| last == b || self.pre_has_cursor_home);
        match self.line.last_mut() {
            Some(last) if duplicate => *last = b,
            _ => self.line.push(b),
        }
        self.pre_has_cursor_home = self.has_cursor_home;
        self.has_cursor_home = false;
        self.may_duplicate = false;
        self.has_newline = false;
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a chunk and wake a waiting reader. Clears a previous stop.
    pub fn add_chunk(&self, chunk: Chunk) {
        {
            let mut state = self.lock();
            state.chunks.push_back(chunk);
            state.stopped = false;
        }
        self.notify.notify_one();
    }

    /// Fail the pending read, and any read that finds no data, with `Stopped`.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.notify.notify_one();
    }

    /// Discard every queued byte.
    pub fn drain(&self) {
        let mut state = self.lock();
        state.chunks.clear();
        state.current = Bytes::new();
    }

    /// Number of queued, unread bytes.
    pub fn queued_len(&self) -> usize {
        let state = self.lock();
        state.current.len() + state.chunks.iter().map(Chunk::len).sum::<usize>()
    }

    async fn next_bytes(&self) -> Result<Bytes, TrzszError> {
        loop {
            {
                let mut state = self.lock();
                if let Some(bytes) = state.take_next() {
                    return Ok(bytes);
                }
                if state.stopped {
                    return Err(TrzszError::Stopped);
                }
            }
            self.notify.notified().await;
        }
    }

    fn unread(&self, rest: Bytes) {
        if !rest.is_empty() {
            self.lock().current = rest;
        }
    }

    /// Read up to (not including) the next `\n`.
    ///
    /// Fails with `Interrupted` when a Ctrl-C byte precedes the newline.
    pub async fn read_line(&self) -> Result<Bytes, TrzszError> {
        let mut line = BytesMut::new();
        loop {
            let mut bytes = self.next_bytes().await?;
            let newline = bytes.iter().position(|&b| b == b'\n');
            let end = newline.unwrap_or(bytes.len());
            if bytes[..end].contains(&INTERRUPT_BYTE) {
                self.unread(bytes.split_off(end));
                return Err(TrzszError::Interrupted);
            }
            line.extend_from_slice(&bytes[..end]);
            if newline.is_some() {
                bytes.advance(end + 1);
                self.unread(bytes);
                return Ok(line.freeze());
            }
        }
    }

    /// Read a line from a Windows console that re-renders echoed input.
    ///
    /// `!` terminates the line, VT100 sequences and whitespace are dropped,
    /// and characters repeated by cursor repositioning are collapsed.
    pub async fn read_line_on_windows(&self) -> Result<Bytes, TrzszError> {
        let mut state = WindowsLineState::default();
        loop {
            let mut bytes = self.next_bytes().await?;
            for i in 0..bytes.len() {
                let b = bytes[i];
                if b == INTERRUPT_BYTE {
                    bytes.advance(i + 1);
                    self.unread(bytes);
                    return Err(TrzszError::Interrupted);
                }
                if state.feed(b) {
                    bytes.advance(i + 1);
                    self.unread(bytes);
                    return Ok(Bytes::from(state.line));
                }
            }
        }
    }

    /// Read exactly `size` bytes.
    pub async fn read_binary(&self, size: usize) -> Result<Bytes, TrzszError> {
        let mut out = BytesMut::with_capacity(size.min(MAX_BINARY_PREALLOC));
        while out.len() < size {
            let mut bytes = self.next_bytes().await?;
            let take = (size - out.len()).min(bytes.len());
            out.extend_from_slice(&bytes.split_to(take));
            self.unread(bytes);
        }
        Ok(out.freeze())
    }
}

// ── Tests ────────────────────────────────────────────────────────
