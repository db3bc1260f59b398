/// Chunked sender: metadata, then fixed-size binary chunks in order.
///
/// ```text
/// [meta text] -> wait(buffered <= HWM) -> [chunk 0] -> wait -> [chunk 1] -> ... -> complete
/// ```
///
/// Several sends may run at once over the same channel; their chunks interleave.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use tandem_types::FileMeta;

use crate::channel::DataChannel;
use crate::error::TransferError;
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::progress::{ProgressBoard, Ticket};
use crate::protocol::{TransferConfig, chunk_count, chunk_len};

const COMPONENT: &str = "sender";

/// A file queued for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    name: String,
    len: u64,
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    Memory(Bytes),
    Disk(PathBuf),
}

impl OutgoingFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            len: data.len() as u64,
            source: Source::Memory(data),
        }
    }

    /// A file on disk, announced under its final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let len = tokio::fs::metadata(path)
            .await
            .map_err(|source| TransferError::Read { name: name.clone(), source })?
            .len();
        Ok(Self {
            name,
            len,
            source: Source::Disk(path.to_path_buf()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    async fn reader(&self) -> Result<ChunkReader, TransferError> {
        match &self.source {
            Source::Memory(data) => Ok(ChunkReader::Memory(data.clone())),
            Source::Disk(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| TransferError::Read { name: self.name.clone(), source })?;
                Ok(ChunkReader::Disk(file))
            }
        }
    }
}

/// Materializes one chunk at a time.
enum ChunkReader {
    Memory(Bytes),
    Disk(tokio::fs::File),
}

impl ChunkReader {
    async fn next_chunk(&mut self, len: usize) -> std::io::Result<Bytes> {
        match self {
            Self::Memory(rest) => Ok(rest.split_to(len.min(rest.len()))),
            Self::Disk(file) => {
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Result of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub file_name: String,
    pub bytes_sent: u64,
    pub chunks: u64,
    pub duration: Duration,
}

/// Sends files over one data channel, sharing one progress board.
pub struct ChunkedSender {
    channel: Arc<dyn DataChannel>,
    config: TransferConfig,
    board: ProgressBoard,
    logger: Arc<dyn TransferLogger>,
    cancel: CancellationToken,
}

impl ChunkedSender {
    pub fn new(channel: Arc<dyn DataChannel>, config: TransferConfig, board: ProgressBoard) -> Self {
        Self {
            channel,
            config,
            board,
            logger: Arc::new(TracingLogger),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sends in flight fail with [`TransferError::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn progress(&self) -> &ProgressBoard {
        &self.board
    }

    /// Send one file. Resolves once the last chunk has been handed to the channel.
    pub async fn send(&self, file: OutgoingFile) -> Result<SendReport, TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !self.channel.is_open() {
            return Err(TransferError::ChannelClosed);
        }

        let started = Instant::now();
        let name = file.name.clone();
        let total = file.len;
        let ticket = self.board.register(&name, total);

        match self.transmit(&file, ticket).await {
            Ok(chunks) => {
                let duration = started.elapsed();
                self.board.complete(&name, ticket);
                self.board.remove_after(&name, ticket, self.config.completion_delay);
                self.log(&name, TransferEvent::TransferComplete {
                    total_bytes: total,
                    chunks,
                    duration_ms: duration.as_millis() as u64,
                });
                Ok(SendReport { file_name: name, bytes_sent: total, chunks, duration })
            }
            Err(e) => {
                self.board.remove(&name, ticket);
                self.log(&name, TransferEvent::Error { message: e.to_string() });
                Err(e)
            }
        }
    }

    async fn transmit(&self, file: &OutgoingFile, ticket: Ticket) -> Result<u64, TransferError> {
        let meta = FileMeta::new(&file.name, file.len).to_text()?;
        self.channel.send_text(meta).await?;
        self.log(&file.name, TransferEvent::MetaSent { file_size: file.len });

        let mut reader = file.reader().await?;
        let chunks = chunk_count(file.len, self.config.chunk_size);
        let mut sent = 0u64;

        for chunk_idx in 0..chunks {
            self.wait_for_drain(&file.name).await?;

            let len = chunk_len(file.len, sent, self.config.chunk_size);
            let chunk = reader
                .next_chunk(len)
                .await
                .map_err(|source| TransferError::Read { name: file.name.clone(), source })?;

            self.channel.send_binary(chunk).await?;
            sent += len as u64;
            self.log(&file.name, TransferEvent::ChunkSent { chunk_idx, size: len });

            if sent < file.len {
                self.board.update(&file.name, ticket, sent);
            }
        }

        Ok(chunks)
    }

    /// Block while the channel holds more than the high-water mark.
    async fn wait_for_drain(&self, name: &str) -> Result<(), TransferError> {
        let mut paused_at: Option<Instant> = None;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if !self.channel.is_open() {
                return Err(TransferError::ChannelClosed);
            }

            let buffered = self.channel.buffered_amount().await;
            if buffered <= self.config.high_water_mark {
                if let Some(start) = paused_at {
                    self.log(name, TransferEvent::BackpressureWait {
                        buffered,
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
                return Ok(());
            }

            paused_at.get_or_insert_with(Instant::now);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(self.config.backpressure_poll) => {}
            }
        }
    }

    fn log(&self, name: &str, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            file_name: Some(name.to_string()),
            event,
        });
    }
}
