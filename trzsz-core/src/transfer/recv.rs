//! Receiving side of the file loop; mirrors [`super::send`].

use tokio::time::Instant;
use tracing::debug;

use super::Transfer;
use crate::error::TrzszError;
use crate::file::{FileWriter, SaveTarget};
use crate::progress::{Progress, ProgressCallback};
use crate::protocol::RequestedName;

impl Transfer {
    /// Receive every announced entry into `target`.
    ///
    /// Returns the local names of the top-level entries, without repeats.
    /// A file whose digest does not match is never reported as saved.
    pub async fn recv_files(
        &mut self,
        target: &mut dyn SaveTarget,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> Result<Vec<String>, TrzszError> {
        self.phase.begin_transfer()?;
        let mut progress = Progress::new(progress);

        let num = self.recv_integer("NUM").await?;
        self.send_integer("SUCC", num)?;
        progress.file_count(num);

        let mut local_names: Vec<String> = Vec::new();
        for _ in 0..num {
            let mut file = self.recv_file_name(target, &mut progress).await?;
            let received = if file.is_dir() {
                Ok(None)
            } else {
                self.recv_file_data(file.as_mut(), &mut progress)
                    .await
                    .map(Some)
            };
            let closed = file.close().await;
            let digest = received?;
            closed?;
            if let Some(digest) = digest {
                self.recv_file_md5(&digest).await?;
                progress.file_done();
            }
            let local_name = file.local_name().to_string();
            if !local_names.contains(&local_name) {
                local_names.push(local_name);
            }
        }
        self.phase.finish_transfer()?;
        Ok(local_names)
    }

    async fn recv_file_name(
        &mut self,
        target: &mut dyn SaveTarget,
        progress: &mut Progress<'_>,
    ) -> Result<Box<dyn FileWriter>, TrzszError> {
        let payload = self.recv_string("NAME", false).await?;
        let name = RequestedName::parse(&payload, self.config.directory)?;
        let file = target.open_save_file(&name, self.config.overwrite).await?;
        self.send_string("SUCC", file.local_name())?;
        progress.file_name(file.file_name());
        Ok(file)
    }

    async fn recv_file_data(
        &mut self,
        file: &mut dyn FileWriter,
        progress: &mut Progress<'_>,
    ) -> Result<[u8; 16], TrzszError> {
        let size = self.recv_integer("SIZE").await?;
        self.send_integer("SUCC", size)?;
        progress.file_size(size);
        debug!(name = file.file_name(), size, "receiving file");

        let mut md5 = md5::Context::new();
        let mut step = 0u64;
        while step < size {
            let begin = Instant::now();
            let data = self.recv_data().await?;
            file.write_chunk(&data).await?;
            step += data.len() as u64;
            progress.step(step);
            self.send_integer("SUCC", data.len() as u64)?;
            md5.consume(&data);
            self.control.record_chunk_time(begin.elapsed());
        }
        Ok(md5.compute().0)
    }

    async fn recv_file_md5(&mut self, digest: &[u8; 16]) -> Result<(), TrzszError> {
        let expected = self.recv_binary("MD5").await?;
        if expected != digest {
            return Err(TrzszError::Md5Mismatch);
        }
        self.send_binary("SUCC", digest)
    }
}
