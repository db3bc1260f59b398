use crate::role::Role;

/// Session-description state of the local peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationPhase {
    #[default]
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
}

impl NegotiationPhase {
    /// No offer is outstanding in either direction.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Stable)
    }
}

/// State of one joined room membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub room_id: String,
    pub local_id: String,
    pub remote_id: Option<String>,
    /// Unresolved until the other participant is seen
    pub role: Option<Role>,
    pub phase: NegotiationPhase,
    pub has_local_description: bool,
    pub has_remote_description: bool,
    pub making_offer: bool,
    pub ignore_offer: bool,
}

impl Session {
    pub fn new(room_id: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            local_id: local_id.into(),
            remote_id: None,
            role: None,
            phase: NegotiationPhase::Idle,
            has_local_description: false,
            has_remote_description: false,
            making_offer: false,
            ignore_offer: false,
        }
    }
}
