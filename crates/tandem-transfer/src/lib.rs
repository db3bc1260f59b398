/// Tandem transfer: chunked file transfer over a peer data channel.
///
/// Provides:
/// - Metadata announcement followed by fixed-size binary chunks
/// - Backpressure against the channel's buffered amount
/// - Arrival-order reassembly with progress reporting
/// - Delivery of finished files to a pluggable sink
pub mod channel;
pub mod error;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod sink;

// Re-export key types for convenience.
pub use channel::DataChannel;
pub use error::TransferError;
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use progress::{ProgressBoard, ProgressSnapshot, Ticket, TransferProgress};
pub use protocol::{
    BACKPRESSURE_POLL, CHUNK_SIZE, COMPLETION_DELAY, HIGH_WATER_MARK, TransferConfig, chunk_count,
    chunk_len, percent,
};
pub use receiver::{ChunkedReceiver, Delivery};
pub use sender::{ChunkedSender, OutgoingFile, SendReport};
pub use sink::{ChannelSink, DirectorySink, FileSink, ReceivedFile};
