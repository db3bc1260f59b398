/// Tandem session: two-party peer connection over a signaling relay.
///
/// Provides:
/// - Perfect negotiation with deterministic polite/impolite roles
/// - WebSocket signaling and a `webrtc` transport behind swappable traits
/// - Connection status tracking
/// - A controller that joins a room, exchanges files and leaves cleanly
pub mod config;
pub mod controller;
pub mod error;
pub mod negotiation;
pub mod role;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod status;
pub mod transport;

pub use config::{DEFAULT_ENDPOINT, DEFAULT_ICE_SERVERS, SessionConfig};
pub use controller::{SessionController, SessionEvent};
pub use error::{ConfigError, MediaError, SessionError, SignalingError, TransportError};
pub use negotiation::{CandidateOutcome, NegotiationEngine, OfferOutcome};
pub use role::{Role, resolve_role};
pub use rtc::{RtcConnector, RtcDataChannel, RtcTransport};
pub use session::{NegotiationPhase, Session};
pub use signaling::{SignalingConnector, SignalingInbound, SignalingLink, WsConnector};
pub use status::{
    ConnectionStatus, ConnectionStatusTracker, IceConnectionState, IceGatheringState, PeerConnectionState,
    STATUS_POLL_INTERVAL,
};
pub use transport::{
    MediaKind, MediaSource, MediaTrack, PeerTransport, SdpKind, SessionDescription, StaticMedia,
    TransportConnector, TransportEvent, TransportEvents,
};
