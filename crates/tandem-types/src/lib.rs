/// Wire types shared by the relay, the session and the transfer layer.
pub mod channel;
pub mod signaling;

pub use channel::{ChannelMessage, FILE_CHANNEL_LABEL, FileMeta};
pub use signaling::{IceCandidatePayload, SignalPayload, SignalingEnvelope};
