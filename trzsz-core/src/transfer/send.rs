//! Sending side of the file loop.
//!
//! ```text
//! NUM n        ─►  ◄─ SUCC n
//! NAME name    ─►  ◄─ SUCC remote name     (per entry)
//! SIZE s       ─►  ◄─ SUCC s               (files only)
//! DATA chunk   ─►  ◄─ SUCC len             (until s bytes sent)
//! MD5 digest   ─►  ◄─ SUCC digest
//! ```

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use super::Transfer;
use crate::error::TrzszError;
use crate::file::FileReader;
use crate::progress::{Progress, ProgressCallback};
use crate::protocol::NameEntry;

/// First chunk size; doubled while chunks are fast.
pub const INITIAL_CHUNK_SIZE: usize = 1024;

/// A full chunk faster than this lets the next one double.
const FAST_CHUNK: Duration = Duration::from_millis(500);

/// Fill `buf` unless the reader runs out first.
async fn read_full(file: &mut dyn FileReader, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read_chunk(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl Transfer {
    /// Send every reader, in order.
    ///
    /// Returns the names the receiver saved under, without repeats. Each
    /// reader is closed exactly once; readers not reached because of an
    /// error are closed by [`Transfer::cleanup`].
    pub async fn send_files(
        &mut self,
        files: Vec<Box<dyn FileReader>>,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> Result<Vec<String>, TrzszError> {
        self.phase.begin_transfer()?;
        let mut progress = Progress::new(progress);
        self.pending = files.into();

        let num = self.pending.len() as u64;
        self.send_integer("NUM", num)?;
        self.check_integer(num).await?;
        progress.file_count(num);

        let mut remote_names: Vec<String> = Vec::new();
        while let Some(mut file) = self.pending.pop_front() {
            let sent = self.send_entry(file.as_mut(), &mut progress).await;
            let closed = file.close().await;
            let (remote_name, digest) = sent?;
            closed?;
            if let Some(digest) = digest {
                self.send_binary("MD5", &digest)?;
                self.check_binary(&digest).await?;
                progress.file_done();
            }
            if !remote_names.contains(&remote_name) {
                remote_names.push(remote_name);
            }
        }
        self.phase.finish_transfer()?;
        Ok(remote_names)
    }

    /// Name, size and content of one entry; the digest is `None` for directories.
    async fn send_entry(
        &mut self,
        file: &mut dyn FileReader,
        progress: &mut Progress<'_>,
    ) -> Result<(String, Option<[u8; 16]>), TrzszError> {
        let name = if self.config.directory {
            NameEntry {
                path_id: file.path_id(),
                path_name: file.rel_path().to_vec(),
                is_dir: file.is_dir(),
            }
            .to_json()?
        } else {
            file.file_name().to_string()
        };
        self.send_string("NAME", &name)?;
        let remote_name = self.recv_string("SUCC", false).await?;
        progress.file_name(file.file_name());
        if file.is_dir() {
            return Ok((remote_name, None));
        }

        let size = file.size();
        self.send_integer("SIZE", size)?;
        self.check_integer(size).await?;
        progress.file_size(size);
        debug!(name = file.file_name(), size, "sending file");

        let digest = self.send_file_data(file, size, progress).await?;
        Ok((remote_name, Some(digest)))
    }

    async fn send_file_data(
        &mut self,
        file: &mut dyn FileReader,
        size: u64,
        progress: &mut Progress<'_>,
    ) -> Result<[u8; 16], TrzszError> {
        let max_buf_size = self.config.max_buf_size();
        let mut buf_size = INITIAL_CHUNK_SIZE.min(max_buf_size);
        let mut buf = vec![0u8; buf_size];
        let mut md5 = md5::Context::new();
        let mut step = 0u64;
        while step < size {
            let begin = Instant::now();
            let want = usize::try_from(size - step).map_or(buf_size, |rest| rest.min(buf_size));
            let n = read_full(file, &mut buf[..want]).await?;
            if n == 0 {
                return Err(TrzszError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank during transfer", file.file_name()),
                )));
            }
            let data = &buf[..n];
            md5.consume(data);
            self.send_data(Bytes::copy_from_slice(data))?;
            self.check_integer(n as u64).await?;
            step += n as u64;
            progress.step(step);

            let elapsed = begin.elapsed();
            self.control.record_chunk_time(elapsed);
            if n == buf_size && elapsed < FAST_CHUNK && buf_size < max_buf_size {
                buf_size = (buf_size * 2).min(max_buf_size);
                buf.resize(buf_size, 0);
            }
        }
        Ok(md5.compute().0)
    }
}
