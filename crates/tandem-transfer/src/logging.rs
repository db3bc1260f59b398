/// Transfer logging trait for structured transfer events.
///
/// Sender and receiver report every state transition through a
/// [`TransferLogger`] so embedders can route them to tracing, a test
/// recorder, or nowhere.
use std::fmt;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    /// `None` when the event cannot be attributed to a transfer.
    pub file_name: Option<String>,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Sender: metadata announcement written to the channel
    MetaSent { file_size: u64 },
    /// Sender: one binary chunk written
    ChunkSent { chunk_idx: u64, size: usize },
    /// Sender: paused until the channel drained below the high-water mark
    BackpressureWait { buffered: usize, waited_ms: u64 },
    /// Receiver: metadata registered a new incoming transfer
    MetaReceived { file_size: u64 },
    /// Receiver: one binary chunk appended
    ChunkReceived { chunk_idx: u64, size: usize, received: u64 },
    /// Receiver: binary chunk with no incomplete transfer to own it
    OrphanChunk { size: usize },
    /// Receiver: text message that is not a metadata announcement
    UnknownText { len: usize },
    /// Receiver: assembled bytes handed to the sink
    Delivered { total_bytes: u64 },
    /// Either side: all bytes accounted for
    TransferComplete { total_bytes: u64, chunks: u64, duration_ms: u64 },
    /// Error occurred
    Error { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetaSent { file_size } => write!(f, "meta_sent size={}", file_size),
            Self::ChunkSent { chunk_idx, size } => {
                write!(f, "chunk_sent idx={} size={}", chunk_idx, size)
            }
            Self::BackpressureWait { buffered, waited_ms } => {
                write!(f, "backpressure_wait buffered={} waited_ms={}", buffered, waited_ms)
            }
            Self::MetaReceived { file_size } => write!(f, "meta_received size={}", file_size),
            Self::ChunkReceived { chunk_idx, size, received } => {
                write!(f, "chunk_received idx={} size={} received={}", chunk_idx, size, received)
            }
            Self::OrphanChunk { size } => write!(f, "orphan_chunk size={}", size),
            Self::UnknownText { len } => write!(f, "unknown_text len={}", len),
            Self::Delivered { total_bytes } => write!(f, "delivered bytes={}", total_bytes),
            Self::TransferComplete { total_bytes, chunks, duration_ms } => {
                write!(f, "transfer_complete bytes={} chunks={} duration_ms={}", total_bytes, chunks, duration_ms)
            }
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing,
/// record entries for inspection, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let file = entry.file_name.as_deref().unwrap_or("-");
        // Use info for key lifecycle events, debug for per-chunk spam
        match &entry.event {
            TransferEvent::OrphanChunk { .. } | TransferEvent::Error { .. } => {
                tracing::warn!(component = entry.component, file, "{}", entry.event);
            }
            TransferEvent::MetaSent { .. }
            | TransferEvent::MetaReceived { .. }
            | TransferEvent::Delivered { .. }
            | TransferEvent::TransferComplete { .. } => {
                tracing::info!(component = entry.component, file, "{}", entry.event);
            }
            _ => {
                tracing::debug!(component = entry.component, file, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
