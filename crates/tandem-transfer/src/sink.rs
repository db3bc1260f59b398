use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransferError;

/// A fully reassembled incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub data: Bytes,
}

/// Destination for reassembled files. Each completed transfer is delivered exactly once.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn deliver(&self, file: ReceivedFile) -> Result<(), TransferError>;
}

/// Forwards delivered files to an mpsc receiver.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ReceivedFile>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceivedFile>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FileSink for ChannelSink {
    async fn deliver(&self, file: ReceivedFile) -> Result<(), TransferError> {
        self.tx.send(file).map_err(|_| TransferError::SinkClosed)
    }
}

/// Writes delivered files into a directory.
///
/// The announced name is reduced to its final path component. An existing
/// file is never overwritten; `name (1).ext`, `name (2).ext`, ... are tried instead.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn deliver(&self, file: ReceivedFile) -> Result<(), TransferError> {
        let io_err = |source: std::io::Error| TransferError::Deliver { name: file.name.clone(), source };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = unique_path(&self.dir, &sanitize_file_name(&file.name)).await;
        tokio::fs::write(&path, &file.data).await.map_err(io_err)?;

        tracing::info!("Saved {} ({} bytes) to {}", file.name, file.data.len(), path.display());
        Ok(())
    }
}

pub(crate) fn sanitize_file_name(name: &str) -> String {
    let candidate = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let trimmed = candidate.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !tokio::fs::try_exists(&first).await.unwrap_or(false) {
        return first;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u32;
    loop {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        };
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
