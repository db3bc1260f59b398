use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransferError;

/// Outbound half of an ordered, reliable message channel.
///
/// Implemented by the WebRTC data channel adapter and by in-memory fakes.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Bytes queued locally and not yet handed to the network.
    async fn buffered_amount(&self) -> usize;

    async fn send_text(&self, text: String) -> Result<(), TransferError>;

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError>;

    async fn close(&self) -> Result<(), TransferError>;
}
