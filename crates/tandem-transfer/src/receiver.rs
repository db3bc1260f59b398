/// Chunked receiver: registers transfers from metadata and reassembles chunks.
///
/// Chunks carry no transfer id. Each binary message is appended to the first
/// registered transfer that is still incomplete, so two files whose chunks
/// interleave on the wire can be misattributed. Senders that need several
/// files delivered intact should not overlap them.
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use tandem_types::{ChannelMessage, FileMeta};

use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::progress::{ProgressBoard, Ticket};
use crate::sink::{FileSink, ReceivedFile};

const COMPONENT: &str = "receiver";

/// A completed transfer that was handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub file_name: String,
    pub size: u64,
}

struct IncomingTransfer {
    name: String,
    declared: u64,
    received: u64,
    chunks: Vec<Bytes>,
    ticket: Ticket,
    started: Instant,
}

impl IncomingTransfer {
    fn is_complete(&self) -> bool {
        self.received >= self.declared
    }
}

/// Reassembles incoming files from one data channel.
///
/// Driven by a single task; every inbound channel message goes through
/// [`ChunkedReceiver::handle_message`].
pub struct ChunkedReceiver {
    /// Incomplete transfers in registration order.
    transfers: Vec<IncomingTransfer>,
    board: ProgressBoard,
    sink: Arc<dyn FileSink>,
    logger: Arc<dyn TransferLogger>,
    completion_delay: Duration,
}

impl ChunkedReceiver {
    pub fn new(sink: Arc<dyn FileSink>, board: ProgressBoard, completion_delay: Duration) -> Self {
        Self {
            transfers: Vec::new(),
            board,
            sink,
            logger: Arc::new(TracingLogger),
            completion_delay,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn progress(&self) -> &ProgressBoard {
        &self.board
    }

    /// Number of registered transfers still waiting for bytes.
    pub fn pending(&self) -> usize {
        self.transfers.len()
    }

    /// Handle one inbound channel message. Returns the delivery when it completed a transfer.
    pub async fn handle_message(&mut self, msg: ChannelMessage) -> Option<Delivery> {
        match msg {
            ChannelMessage::Text(text) => match FileMeta::parse(&text) {
                Some(meta) => self.register(meta).await,
                None => {
                    self.log(None, TransferEvent::UnknownText { len: text.len() });
                    None
                }
            },
            ChannelMessage::Binary(chunk) => self.append(chunk).await,
        }
    }

    /// Drop every transfer and clear the visible set.
    pub fn reset(&mut self) {
        self.transfers.clear();
        self.board.clear();
    }

    async fn register(&mut self, meta: FileMeta) -> Option<Delivery> {
        let ticket = self.board.register(&meta.file_name, meta.file_size);
        let transfer = IncomingTransfer {
            name: meta.file_name.clone(),
            declared: meta.file_size,
            received: 0,
            chunks: Vec::new(),
            ticket,
            started: Instant::now(),
        };

        let idx = match self.transfers.iter().position(|t| t.name == meta.file_name) {
            Some(idx) => {
                self.transfers[idx] = transfer;
                idx
            }
            None => {
                self.transfers.push(transfer);
                self.transfers.len() - 1
            }
        };
        self.log(Some(&meta.file_name), TransferEvent::MetaReceived { file_size: meta.file_size });

        if meta.file_size == 0 {
            return self.finish(idx).await;
        }
        None
    }

    async fn append(&mut self, chunk: Bytes) -> Option<Delivery> {
        let Some(idx) = self.transfers.iter().position(|t| !t.is_complete()) else {
            self.log(None, TransferEvent::OrphanChunk { size: chunk.len() });
            return None;
        };

        let size = chunk.len();
        let transfer = &mut self.transfers[idx];
        transfer.received += size as u64;
        transfer.chunks.push(chunk);
        let (name, ticket, received) = (transfer.name.clone(), transfer.ticket, transfer.received);
        let chunk_idx = transfer.chunks.len() as u64 - 1;

        self.log(Some(&name), TransferEvent::ChunkReceived { chunk_idx, size, received });

        if self.transfers[idx].is_complete() {
            self.finish(idx).await
        } else {
            self.board.update(&name, ticket, received);
            None
        }
    }

    async fn finish(&mut self, idx: usize) -> Option<Delivery> {
        let transfer = self.transfers.remove(idx);

        let mut data = BytesMut::with_capacity(transfer.received as usize);
        for chunk in &transfer.chunks {
            data.extend_from_slice(chunk);
        }
        let data = data.freeze();
        let size = data.len() as u64;

        self.board.complete(&transfer.name, transfer.ticket);
        self.board.remove_after(&transfer.name, transfer.ticket, self.completion_delay);
        self.log(Some(&transfer.name), TransferEvent::TransferComplete {
            total_bytes: size,
            chunks: transfer.chunks.len() as u64,
            duration_ms: transfer.started.elapsed().as_millis() as u64,
        });

        let file = ReceivedFile { name: transfer.name.clone(), data };
        match self.sink.deliver(file).await {
            Ok(()) => {
                self.log(Some(&transfer.name), TransferEvent::Delivered { total_bytes: size });
                Some(Delivery { file_name: transfer.name, size })
            }
            Err(e) => {
                self.log(Some(&transfer.name), TransferEvent::Error { message: e.to_string() });
                None
            }
        }
    }

    fn log(&self, name: Option<&str>, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            file_name: name.map(str::to_string),
            event,
        });
    }
}
