//! Output file for chunked downloads
//!
//! The file is opened once and shared by every chunk task. Writes are
//! offset-addressed so concurrent writers never contend on a cursor.

use crate::error::TransferError;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A destination file open for positional writes
pub struct OutputFile {
    path: PathBuf,
    file: Arc<File>,
}

impl OutputFile {
    /// Create (or truncate) the file at `path`, creating parent directories
    pub async fn create(path: &Path) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let open_path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(open_path)
        })
        .await
        .map_err(|e| TransferError::TaskFailed(e.to_string()))??;

        debug!("Opened output file {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A handle chunk tasks write through
    pub fn writer(&self) -> OffsetWriter {
        OffsetWriter {
            file: self.file.clone(),
        }
    }

    /// Flush to disk and release the handle
    pub async fn close(self) -> Result<(), TransferError> {
        let file = self.file;
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| TransferError::TaskFailed(e.to_string()))??;
        debug!("Closed output file {:?}", self.path);
        Ok(())
    }
}

/// Shared positional writer over an [`OutputFile`]
#[derive(Clone)]
pub struct OffsetWriter {
    file: Arc<File>,
}

impl OffsetWriter {
    /// Write all of `buf` at `offset`, handing the buffer back afterwards
    pub async fn write_at(&self, offset: u64, buf: Vec<u8>) -> Result<Vec<u8>, TransferError> {
        let file = self.file.clone();
        let buf = tokio::task::spawn_blocking(move || {
            write_all_at(&file, &buf, offset)?;
            Ok::<_, io::Error>(buf)
        })
        .await
        .map_err(|e| TransferError::TaskFailed(e.to_string()))??;
        Ok(buf)
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_out_of_order_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        let file = OutputFile::create(&path).await.unwrap();

        let mut tasks = Vec::new();
        let chunks = [(6u64, b"ghij".to_vec()), (0, b"abc".to_vec()), (3, b"def".to_vec())];
        for (offset, chunk) in chunks {
            let writer = file.writer();
            tasks.push(tokio::spawn(async move { writer.write_at(offset, chunk).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        file.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_create_truncates_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"stale content").unwrap();

        let file = OutputFile::create(&path).await.unwrap();
        assert_eq!(file.path(), path.as_path());
        file.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }
}
