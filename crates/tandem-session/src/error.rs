use thiserror::Error;

use tandem_transfer::TransferError;

/// Failures reported by a [`crate::transport::PeerTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("invalid session description: {0}")]
    Description(String),
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Failures of the signaling connection.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("signaling connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalingError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Local media could not be acquired or attached.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MediaError(pub String);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("not in a room")]
    NotJoined,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
