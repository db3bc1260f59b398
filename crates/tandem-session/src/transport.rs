use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tandem_transfer::DataChannel;
use tandem_types::{ChannelMessage, IceCandidatePayload};

use crate::error::{MediaError, TransportError};
use crate::status::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(MediaError(format!("unknown media kind '{}'", other))),
        }
    }
}

/// A local or remote media track, identified but not carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub kind: MediaKind,
    pub id: String,
    pub stream_id: String,
}

/// Supplies the local tracks to attach on join. Capture itself happens elsewhere.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Vec<MediaTrack>, MediaError>;
}

/// The same track descriptors on every join.
pub struct StaticMedia(pub Vec<MediaTrack>);

#[async_trait]
impl MediaSource for StaticMedia {
    async fn acquire(&self) -> Result<Vec<MediaTrack>, MediaError> {
        Ok(self.0.clone())
    }
}

/// Something the transport reports asynchronously.
pub enum TransportEvent {
    /// Locally gathered ICE candidate, to be trickled to the peer
    LocalCandidate(IceCandidatePayload),
    /// Data channel created by the remote side
    ChannelAccepted(Arc<dyn DataChannel>),
    ChannelOpen { label: String },
    ChannelClosed { label: String },
    ChannelError { label: String, message: String },
    /// Inbound data channel message, from any channel
    Message(ChannelMessage),
    RemoteTrack(MediaTrack),
    Status(ConnectionStatus),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::ChannelAccepted(dc) => f.debug_tuple("ChannelAccepted").field(&dc.label()).finish(),
            Self::ChannelOpen { label } => f.debug_struct("ChannelOpen").field("label", label).finish(),
            Self::ChannelClosed { label } => f.debug_struct("ChannelClosed").field("label", label).finish(),
            Self::ChannelError { label, message } => f
                .debug_struct("ChannelError")
                .field("label", label)
                .field("message", message)
                .finish(),
            Self::Message(m) => f.debug_tuple("Message").field(&m.len()).finish(),
            Self::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(t).finish(),
            Self::Status(s) => f.debug_tuple("Status").field(s).finish(),
        }
    }
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// The peer connection as the negotiation engine and controller see it.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Discard a local offer that has not been answered.
    async fn rollback(&self) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidatePayload) -> Result<(), TransportError>;

    async fn add_track(&self, track: MediaTrack) -> Result<(), TransportError>;

    /// Create an ordered, reliable data channel.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError>;

    async fn status(&self) -> ConnectionStatus;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates a fresh transport per joined room.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError>;
}
