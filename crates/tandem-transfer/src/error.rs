use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("data channel is not open")]
    ChannelClosed,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("data channel send failed: {0}")]
    Send(String),
    #[error("failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deliver {name}: {source}")]
    Deliver {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("receiver for delivered files is gone")]
    SinkClosed,
    #[error("metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
