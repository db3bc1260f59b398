use serde::{Deserialize, Serialize};

/// A message exchanged with the signaling relay.
///
/// On the wire this is one flat JSON object per WebSocket text frame:
///
/// ```text
/// {"type":"offer","roomId":"r1","displayName":"alice","sdp":"v=0 ..."}
/// {"type":"ice-candidate","roomId":"r1","displayName":"bob","candidate":{...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    pub room_id: String,

    /// Sender's display identifier. The relay fills it in for `user-joined` / `user-left`.
    #[serde(default)]
    pub display_name: String,

    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalingEnvelope {
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>, payload: SignalPayload) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            payload,
        }
    }

    /// Parse a text frame. Anything that is not a well-formed envelope is an error.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Discriminated payload of a [`SignalingEnvelope`], tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalPayload {
    /// Enter a room
    Join,
    /// Session description offer
    Offer { sdp: String },
    /// Session description answer
    Answer { sdp: String },
    /// Trickled ICE candidate
    IceCandidate { candidate: IceCandidatePayload },
    /// Leave a room
    Leave,
    /// Relay-synthesized: another participant joined the room
    UserJoined,
    /// Relay-synthesized: another participant left the room
    UserLeft,
}

impl SignalPayload {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Leave => "leave",
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
        }
    }

    /// Whether the relay forwards this payload verbatim to the other room members.
    pub fn is_peer_relayed(&self) -> bool {
        matches!(self, Self::Offer { .. } | Self::Answer { .. } | Self::IceCandidate { .. })
    }
}

/// ICE candidate fields as browsers serialize `RTCIceCandidateInit`. All nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub candidate: Option<String>,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
    pub username_fragment: Option<String>,
}

impl IceCandidatePayload {
    /// An empty or missing candidate string marks end-of-candidates.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.as_deref().is_none_or(str::is_empty)
    }
}
