/// Perfect negotiation over a relay with no arbiter.
///
/// ```text
///            user-joined (impolite)          answer
///   Idle ────────────────────────> HaveLocalOffer ───────> Stable
///     │                                  │ offer (polite: rollback)
///     │ offer                            v
///     └──────────────────────────> HaveRemoteOffer ──────> Stable
///                                             answer sent
/// ```
///
/// An offer collides when this side is making an offer or has one outstanding.
/// The polite side yields (rolls back and answers); the impolite side ignores
/// the remote offer and keeps ignoring failures of the candidates that belong
/// to it until the next remote description applies cleanly.
use tracing::{debug, info, warn};

use tandem_types::{IceCandidatePayload, SignalPayload, SignalingEnvelope};

use crate::error::SessionError;
use crate::role::{Role, resolve_role};
use crate::session::{NegotiationPhase, Session};
use crate::signaling::SignalingLink;
use crate::transport::{PeerTransport, SessionDescription};

/// What happened to an inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Answered,
    /// Our outstanding offer was rolled back first
    AnsweredAfterRollback,
    /// Collision on the impolite side; nothing applied, nothing sent
    Ignored,
}

/// What happened to an inbound ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Added,
    /// End-of-candidates marker
    Skipped,
    /// Add failed while ignoring an offer
    Suppressed,
}

pub struct NegotiationEngine {
    session: Session,
}

impl NegotiationEngine {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The other participant appeared. The impolite side originates an offer.
    pub async fn on_peer_joined(
        &mut self,
        remote_id: &str,
        transport: &dyn PeerTransport,
        signaling: &dyn SignalingLink,
    ) -> Result<Role, SessionError> {
        let role = self.observe_remote(remote_id);
        if role.is_polite() {
            info!("{} joined; we are polite, waiting for offer", remote_id);
        } else {
            info!("{} joined; we are impolite, making offer", remote_id);
            self.make_offer(transport, signaling).await?;
        }
        Ok(role)
    }

    /// The other participant left. The transport stays up for a rejoin.
    pub fn on_peer_left(&mut self, remote_id: &str) {
        if self.session.remote_id.as_deref() == Some(remote_id) || remote_id.is_empty() {
            self.session.remote_id = None;
        }
    }

    pub async fn on_offer(
        &mut self,
        remote_id: &str,
        sdp: String,
        transport: &dyn PeerTransport,
        signaling: &dyn SignalingLink,
    ) -> Result<OfferOutcome, SessionError> {
        let role = self.observe_remote(remote_id);
        let collision = self.session.making_offer || !self.session.phase.is_settled();

        self.session.ignore_offer = collision && !role.is_polite();
        if self.session.ignore_offer {
            info!("Ignoring colliding offer from {}", remote_id);
            return Ok(OfferOutcome::Ignored);
        }

        let rolled_back = collision && self.session.phase == NegotiationPhase::HaveLocalOffer;
        if rolled_back {
            info!("Offer collision; rolling back local offer");
            transport.rollback().await?;
            self.session.phase = NegotiationPhase::Idle;
            self.session.has_local_description = false;
        }

        transport.set_remote_description(SessionDescription::offer(sdp)).await?;
        self.remote_applied(NegotiationPhase::HaveRemoteOffer);

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.session.phase = NegotiationPhase::Stable;
        self.session.has_local_description = true;

        signaling.send(&self.envelope(SignalPayload::Answer { sdp: answer.sdp })).await?;
        debug!("Answer sent to {}", remote_id);

        Ok(if rolled_back {
            OfferOutcome::AnsweredAfterRollback
        } else {
            OfferOutcome::Answered
        })
    }

    /// Answers are applied unconditionally.
    pub async fn on_answer(&mut self, sdp: String, transport: &dyn PeerTransport) -> Result<(), SessionError> {
        transport.set_remote_description(SessionDescription::answer(sdp)).await?;
        self.remote_applied(NegotiationPhase::Stable);
        debug!("Remote answer applied");
        Ok(())
    }

    /// Add a remote candidate. Failures are errors only while no offer is being ignored.
    pub async fn on_ice_candidate(
        &mut self,
        candidate: IceCandidatePayload,
        transport: &dyn PeerTransport,
    ) -> Result<CandidateOutcome, SessionError> {
        if candidate.is_end_of_candidates() {
            return Ok(CandidateOutcome::Skipped);
        }
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => Ok(CandidateOutcome::Added),
            Err(e) if self.session.ignore_offer => {
                debug!("Candidate rejected while ignoring offer: {}", e);
                Ok(CandidateOutcome::Suppressed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn make_offer(&mut self, transport: &dyn PeerTransport, signaling: &dyn SignalingLink) -> Result<(), SessionError> {
        self.session.making_offer = true;
        let result = self.send_offer(transport, signaling).await;
        self.session.making_offer = false;
        if let Err(e) = &result {
            warn!("Making offer failed: {}", e);
        }
        result
    }

    async fn send_offer(&mut self, transport: &dyn PeerTransport, signaling: &dyn SignalingLink) -> Result<(), SessionError> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.session.phase = NegotiationPhase::HaveLocalOffer;
        self.session.has_local_description = true;
        signaling.send(&self.envelope(SignalPayload::Offer { sdp: offer.sdp })).await?;
        Ok(())
    }

    fn remote_applied(&mut self, phase: NegotiationPhase) {
        self.session.phase = phase;
        self.session.has_remote_description = true;
        self.session.ignore_offer = false;
    }

    /// Record the remote id and (re)resolve the role when it is new.
    fn observe_remote(&mut self, remote_id: &str) -> Role {
        if let (Some(role), Some(current)) = (self.session.role, self.session.remote_id.as_deref()) {
            if current == remote_id {
                return role;
            }
        }
        let role = resolve_role(&self.session.local_id, remote_id);
        debug!("Resolved role {} against {}", role, remote_id);
        self.session.remote_id = Some(remote_id.to_string());
        self.session.role = Some(role);
        role
    }

    fn envelope(&self, payload: SignalPayload) -> SignalingEnvelope {
        SignalingEnvelope::new(&self.session.room_id, &self.session.local_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use tandem_transfer::DataChannel;

    use crate::error::{SignalingError, TransportError};
    use crate::status::ConnectionStatus;
    use crate::transport::{MediaTrack, SdpKind};

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<String>>,
        reject_candidates: bool,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
            self.record("create_offer");
            Ok(SessionDescription::offer("local-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
            self.record("create_answer");
            Ok(SessionDescription::answer("local-answer"))
        }

        async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
            self.record(format!("set_local {:?}", desc.kind));
            Ok(())
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
            self.record(format!("set_remote {:?} {}", desc.kind, desc.sdp));
            Ok(())
        }

        async fn rollback(&self) -> Result<(), TransportError> {
            self.record("rollback");
            Ok(())
        }

        async fn add_ice_candidate(&self, _candidate: IceCandidatePayload) -> Result<(), TransportError> {
            self.record("add_candidate");
            if self.reject_candidates {
                Err(TransportError::Other("no remote description".into()))
            } else {
                Ok(())
            }
        }

        async fn add_track(&self, _track: MediaTrack) -> Result<(), TransportError> {
            Ok(())
        }

        async fn create_data_channel(&self, _label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
            Err(TransportError::Other("not supported".into()))
        }

        async fn status(&self) -> ConnectionStatus {
            ConnectionStatus::default()
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSignaling {
        sent: Mutex<Vec<SignalingEnvelope>>,
    }

    #[async_trait]
    impl SignalingLink for FakeSignaling {
        async fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn candidate() -> IceCandidatePayload {
        IceCandidatePayload {
            candidate: Some("candidate:1 1 udp 1 10.0.0.1 5000 typ host".into()),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_impolite_offers_on_peer_joined() {
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();

        let role = alice.on_peer_joined("bob", &transport, &signaling).await.unwrap();

        assert_eq!(role, Role::Impolite);
        assert_eq!(transport.calls(), vec!["create_offer", "set_local Offer"]);
        let sent = signaling.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].display_name, "alice");
        assert_eq!(sent[0].room_id, "r1");
        assert_eq!(sent[0].payload, SignalPayload::Offer { sdp: "local-offer".into() });
        assert_eq!(alice.session().phase, NegotiationPhase::HaveLocalOffer);
        assert!(!alice.session().making_offer);
    }

    #[tokio::test]
    async fn test_polite_waits_on_peer_joined() {
        let mut bob = NegotiationEngine::new(Session::new("r1", "bob"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();

        let role = bob.on_peer_joined("alice", &transport, &signaling).await.unwrap();

        assert_eq!(role, Role::Polite);
        assert!(transport.calls().is_empty());
        assert!(signaling.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offer_without_collision_is_answered() {
        let mut bob = NegotiationEngine::new(Session::new("r1", "bob"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();

        let outcome = bob.on_offer("alice", "remote-offer".into(), &transport, &signaling).await.unwrap();

        assert_eq!(outcome, OfferOutcome::Answered);
        assert_eq!(
            transport.calls(),
            vec!["set_remote Offer remote-offer", "create_answer", "set_local Answer"]
        );
        assert_eq!(
            signaling.sent.lock().unwrap()[0].payload,
            SignalPayload::Answer { sdp: "local-answer".into() }
        );
        let session = bob.session();
        assert_eq!(session.role, Some(Role::Polite));
        assert_eq!(session.remote_id.as_deref(), Some("alice"));
        assert_eq!(session.phase, NegotiationPhase::Stable);
        assert!(session.has_local_description && session.has_remote_description);
    }

    #[tokio::test]
    async fn test_glare_polite_rolls_back_and_answers() {
        // bob is polite against alice but has an offer outstanding
        let mut bob = NegotiationEngine::new(Session::new("r1", "bob"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();
        bob.observe_remote("alice");
        bob.make_offer(&transport, &signaling).await.unwrap();

        let outcome = bob.on_offer("alice", "alice-offer".into(), &transport, &signaling).await.unwrap();

        assert_eq!(outcome, OfferOutcome::AnsweredAfterRollback);
        assert_eq!(
            transport.calls(),
            vec![
                "create_offer",
                "set_local Offer",
                "rollback",
                "set_remote Offer alice-offer",
                "create_answer",
                "set_local Answer",
            ]
        );
        let sent = signaling.sent.lock().unwrap();
        assert!(matches!(sent[1].payload, SignalPayload::Answer { .. }));
        assert_eq!(bob.session().phase, NegotiationPhase::Stable);
    }

    #[tokio::test]
    async fn test_role_flip_with_offer_outstanding_rolls_back() {
        // alice offered to bob; bob left and "aaa" arrived, against whom alice is polite
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();
        assert_eq!(alice.on_peer_joined("bob", &transport, &signaling).await.unwrap(), Role::Impolite);
        alice.on_peer_left("bob");
        assert_eq!(alice.session().phase, NegotiationPhase::HaveLocalOffer);

        let outcome = alice.on_offer("aaa", "aaa-offer".into(), &transport, &signaling).await.unwrap();

        assert_eq!(outcome, OfferOutcome::AnsweredAfterRollback);
        assert_eq!(alice.session().role, Some(Role::Polite));
        assert_eq!(alice.session().remote_id.as_deref(), Some("aaa"));
        assert!(transport.calls().contains(&"rollback".to_string()));
        assert_eq!(alice.session().phase, NegotiationPhase::Stable);
    }

    #[tokio::test]
    async fn test_glare_impolite_ignores_offer() {
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();
        alice.on_peer_joined("bob", &transport, &signaling).await.unwrap();

        let outcome = alice.on_offer("bob", "bob-offer".into(), &transport, &signaling).await.unwrap();

        assert_eq!(outcome, OfferOutcome::Ignored);
        assert!(alice.session().ignore_offer);
        assert_eq!(alice.session().phase, NegotiationPhase::HaveLocalOffer);
        // no remote applied, no answer sent
        assert_eq!(transport.calls(), vec!["create_offer", "set_local Offer"]);
        assert_eq!(signaling.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_answer_clears_ignore_offer() {
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let transport = FakeTransport::default();
        let signaling = FakeSignaling::default();
        alice.on_peer_joined("bob", &transport, &signaling).await.unwrap();
        alice.on_offer("bob", "bob-offer".into(), &transport, &signaling).await.unwrap();
        assert!(alice.session().ignore_offer);

        alice.on_answer("bob-answer".into(), &transport).await.unwrap();

        assert!(!alice.session().ignore_offer);
        assert_eq!(alice.session().phase, NegotiationPhase::Stable);
        assert!(alice.session().has_remote_description);
    }

    #[tokio::test]
    async fn test_candidate_failure_suppressed_iff_ignoring() {
        let transport = FakeTransport { reject_candidates: true, ..Default::default() };
        let signaling = FakeSignaling::default();

        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let err = alice.on_ice_candidate(candidate(), &transport).await;
        assert!(err.is_err());

        alice.on_peer_joined("bob", &transport, &signaling).await.unwrap();
        alice.on_offer("bob", "bob-offer".into(), &transport, &signaling).await.unwrap();
        let outcome = alice.on_ice_candidate(candidate(), &transport).await.unwrap();
        assert_eq!(outcome, CandidateOutcome::Suppressed);
    }

    #[tokio::test]
    async fn test_end_of_candidates_skipped() {
        let transport = FakeTransport::default();
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));

        let outcome = alice
            .on_ice_candidate(IceCandidatePayload::default(), &transport)
            .await
            .unwrap();

        assert_eq!(outcome, CandidateOutcome::Skipped);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_exchange_between_two_engines() {
        let mut alice = NegotiationEngine::new(Session::new("r1", "alice"));
        let mut bob = NegotiationEngine::new(Session::new("r1", "bob"));
        let (alice_pc, bob_pc) = (FakeTransport::default(), FakeTransport::default());
        let (alice_sig, bob_sig) = (FakeSignaling::default(), FakeSignaling::default());

        // both learn about each other; only alice offers
        assert_eq!(bob.on_peer_joined("alice", &bob_pc, &bob_sig).await.unwrap(), Role::Polite);
        assert_eq!(alice.on_peer_joined("bob", &alice_pc, &alice_sig).await.unwrap(), Role::Impolite);
        assert!(bob_sig.sent.lock().unwrap().is_empty());

        let offer = alice_sig.sent.lock().unwrap()[0].clone();
        let SignalPayload::Offer { sdp } = offer.payload else { panic!("expected offer") };
        bob.on_offer(&offer.display_name, sdp, &bob_pc, &bob_sig).await.unwrap();

        let answer = bob_sig.sent.lock().unwrap()[0].clone();
        let SignalPayload::Answer { sdp } = answer.payload else { panic!("expected answer") };
        alice.on_answer(sdp, &alice_pc).await.unwrap();

        assert_eq!(alice.session().phase, NegotiationPhase::Stable);
        assert_eq!(bob.session().phase, NegotiationPhase::Stable);
        assert!(alice_pc.calls().contains(&format!("set_remote {:?} local-answer", SdpKind::Answer)));
    }

    #[test]
    fn test_peer_left_forgets_remote() {
        let mut bob = NegotiationEngine::new(Session::new("r1", "bob"));
        bob.observe_remote("alice");
        bob.on_peer_left("mallory");
        assert_eq!(bob.session().remote_id.as_deref(), Some("alice"));
        bob.on_peer_left("alice");
        assert_eq!(bob.session().remote_id, None);
    }
}
