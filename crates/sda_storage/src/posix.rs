//! Local filesystem object store, rooted at a configured directory.
//!
//! Writes go to a temp file beside the destination and are renamed into
//! place only on a clean shutdown, so a reader never observes a partially
//! written file (spec.md §4.2).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, StorageError};
use crate::ObjectStore;

pub struct PosixBackend {
    root: PathBuf,
}

impl PosixBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl ObjectStore for PosixBackend {
    async fn get_file_size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| map_io_err(&full, e))?;
        Ok(meta.len())
    }

    async fn reader(&self, path: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let full = self.resolve(path);
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| map_io_err(&full, e))?;
        Ok(Box::new(file))
    }

    async fn writer(&self, path: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let final_path = self.resolve(path);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_err(parent, e))?;
        }
        let temp_path = temp_path_for(&final_path);
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| map_io_err(&temp_path, e))?;
        Ok(Box::new(AtomicFileWriter {
            file,
            temp_path,
            final_path,
            rename_fut: None,
        }))
    }
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "object".to_string());
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()))
}

fn map_io_err(path: &Path, source: std::io::Error) -> StorageError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::io(path.display().to_string(), source)
    }
}

#[pin_project]
struct AtomicFileWriter {
    #[pin]
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    rename_fut: Option<Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>>,
}

impl AsyncWrite for AtomicFileWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().file.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().file.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut this = self.project();

        match this.file.as_mut().poll_shutdown(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if this.rename_fut.is_none() {
            let from = this.temp_path.clone();
            let to = this.final_path.clone();
            *this.rename_fut = Some(Box::pin(tokio::fs::rename(from, to)));
        }

        this.rename_fut.as_mut().unwrap().as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path());

        let mut writer = backend.writer("sub/object.bin").await.unwrap();
        writer.write_all(b"archived bytes").await.unwrap();
        writer.shutdown().await.unwrap();

        let size = backend.get_file_size("sub/object.bin").await.unwrap();
        assert_eq!(size, 14);

        let mut reader = backend.reader("sub/object.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"archived bytes");
    }

    #[tokio::test]
    async fn writer_leaves_no_temp_file_visible_under_final_name_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path());

        let mut writer = backend.writer("object.bin").await.unwrap();
        writer.write_all(b"partial").await.unwrap();

        assert!(backend.get_file_size("object.bin").await.is_err());

        writer.shutdown().await.unwrap();
        assert!(backend.get_file_size("object.bin").await.is_ok());
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PosixBackend::new(dir.path());
        let err = backend.get_file_size("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
