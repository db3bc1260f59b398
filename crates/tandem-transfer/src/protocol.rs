/// Chunked file transfer over an ordered, reliable data channel.
///
/// ```text
/// text    {"fileMeta":true,"fileName":"a.bin","fileSize":200000}
/// binary  [65536 bytes]
/// binary  [65536 bytes]
/// binary  [65536 bytes]
/// binary  [2032 bytes]
/// ```
///
/// Chunks carry no header. The receiver attributes them by arrival order.
use std::time::Duration;

/// Payload bytes per binary message (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Sender pauses while the channel has more than this many bytes queued (8 MiB).
pub const HIGH_WATER_MARK: usize = 8 * 1024 * 1024;

/// How often a paused sender re-checks the buffered amount.
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// How long a finished transfer stays in the visible progress set.
pub const COMPLETION_DELAY: Duration = Duration::from_millis(1200);

/// Tunables shared by sender and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub backpressure_poll: Duration,
    pub completion_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            backpressure_poll: BACKPRESSURE_POLL,
            completion_delay: COMPLETION_DELAY,
        }
    }
}

/// Number of binary messages needed for `total` bytes. Zero for an empty file.
pub fn chunk_count(total: u64, chunk_size: usize) -> u64 {
    total.div_ceil(chunk_size as u64)
}

/// Length of the chunk starting at `offset`.
pub fn chunk_len(total: u64, offset: u64, chunk_size: usize) -> usize {
    total.saturating_sub(offset).min(chunk_size as u64) as usize
}

/// Progress as a percentage. Only a finished transfer reports 100.
pub fn percent(done: u64, total: u64) -> f64 {
    if done >= total {
        return 100.0;
    }
    (done as f64 * 100.0 / total as f64).min(99.99)
}
