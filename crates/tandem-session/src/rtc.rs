/// `webrtc` crate adapter for [`PeerTransport`] and [`DataChannel`].
///
/// Callbacks registered on the peer connection are turned into
/// [`TransportEvent`]s on an unbounded channel owned by the session loop.
///
/// `webrtc` cannot roll back a local offer, so [`RtcTransport::rollback`]
/// replaces the whole `RTCPeerConnection` and recreates its local channels and
/// tracks on the new one. Callbacks of a replaced connection go quiet.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use tandem_transfer::{DataChannel, TransferError};
use tandem_types::{ChannelMessage, IceCandidatePayload};

use crate::error::TransportError;
use crate::status::{ConnectionStatus, IceConnectionState, IceGatheringState, PeerConnectionState};
use crate::transport::{
    MediaKind, MediaTrack, PeerTransport, SdpKind, SessionDescription, TransportConnector, TransportEvent,
    TransportEvents,
};

/// Forwards events only while its connection is the current one.
#[derive(Clone)]
struct EventGate {
    tx: mpsc::UnboundedSender<TransportEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl EventGate {
    fn send(&self, event: TransportEvent) {
        if self.current.load(Ordering::Acquire) == self.generation {
            let _ = self.tx.send(event);
        }
    }

    fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..self.clone()
        }
    }
}

/// Builds one `RTCPeerConnection` per join.
pub struct RtcConnector {
    ice_servers: Vec<String>,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    /// Like [`TransportConnector::connect`], keeping the concrete type.
    pub async fn open(&self) -> Result<(RtcTransport, TransportEvents), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut config = RTCConfiguration::default();
        if !self.ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(api.new_peer_connection(config.clone()).await?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let gate = EventGate {
            tx: events_tx,
            current: Arc::new(AtomicU64::new(0)),
            generation: 0,
        };
        wire_peer_connection(&pc, gate.clone());

        let transport = RtcTransport {
            api,
            config,
            conn: Mutex::new(Connection {
                pc,
                gate,
                channels: Vec::new(),
                tracks: Vec::new(),
            }),
        };
        Ok((transport, events_rx))
    }
}

#[async_trait]
impl TransportConnector for RtcConnector {
    async fn connect(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let (transport, events) = self.open().await?;
        Ok((Arc::new(transport), events))
    }
}

fn wire_peer_connection(pc: &Arc<RTCPeerConnection>, gate: EventGate) {
    let ice_gate = gate.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let gate = ice_gate.clone();
        Box::pin(async move {
            // None marks the end of gathering; the peer needs nothing for it
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => gate.send(TransportEvent::LocalCandidate(IceCandidatePayload {
                    candidate: Some(init.candidate),
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => warn!("Failed to serialize local candidate: {}", e),
            }
        })
    }));

    // State callbacks only signal a change; the snapshot is read back whole
    let weak = Arc::downgrade(pc);
    let state_gate = gate.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        debug!("Peer connection state: {}", state);
        let (pc, gate) = (weak.clone(), state_gate.clone());
        Box::pin(async move {
            if let Some(pc) = pc.upgrade() {
                gate.send(TransportEvent::Status(read_status(&pc)));
            }
        })
    }));

    let weak = Arc::downgrade(pc);
    let state_gate = gate.clone();
    pc.on_ice_connection_state_change(Box::new(move |state| {
        debug!("ICE connection state: {}", state);
        let (pc, gate) = (weak.clone(), state_gate.clone());
        Box::pin(async move {
            if let Some(pc) = pc.upgrade() {
                gate.send(TransportEvent::Status(read_status(&pc)));
            }
        })
    }));

    let weak = Arc::downgrade(pc);
    let state_gate = gate.clone();
    pc.on_ice_gathering_state_change(Box::new(move |_| {
        let (pc, gate) = (weak.clone(), state_gate.clone());
        Box::pin(async move {
            if let Some(pc) = pc.upgrade() {
                gate.send(TransportEvent::Status(read_status(&pc)));
            }
        })
    }));

    let dc_gate = gate.clone();
    pc.on_data_channel(Box::new(move |dc| {
        let gate = dc_gate.clone();
        Box::pin(async move {
            debug!("Remote opened data channel {}", dc.label());
            wire_data_channel(&dc, gate.clone());
            gate.send(TransportEvent::ChannelAccepted(Arc::new(RtcDataChannel::new(dc))));
        })
    }));

    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let gate = gate.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                other => {
                    debug!("Ignoring remote track of kind {:?}", other);
                    return;
                }
            };
            gate.send(TransportEvent::RemoteTrack(MediaTrack {
                kind,
                id: track.id(),
                stream_id: track.stream_id(),
            }));
        })
    }));
}

fn read_status(pc: &RTCPeerConnection) -> ConnectionStatus {
    ConnectionStatus {
        ice: match pc.ice_connection_state() {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        },
        connection: match pc.connection_state() {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        },
        gathering: match pc.ice_gathering_state() {
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        },
    }
}

fn ordered() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    }
}

async fn attach_track(pc: &RTCPeerConnection, track: &MediaTrack) -> Result<(), TransportError> {
    let mime_type = match track.kind {
        MediaKind::Audio => MIME_TYPE_OPUS,
        MediaKind::Video => MIME_TYPE_VP8,
    };
    let local = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        track.id.clone(),
        track.stream_id.clone(),
    ));
    pc.add_track(local as Arc<dyn TrackLocal + Send + Sync>).await?;
    Ok(())
}

type ChannelSlot = Arc<RwLock<Arc<RTCDataChannel>>>;

/// The current connection and what must be recreated if it is replaced.
struct Connection {
    pc: Arc<RTCPeerConnection>,
    gate: EventGate,
    /// Locally created channels, by label
    channels: Vec<(String, ChannelSlot)>,
    tracks: Vec<MediaTrack>,
}

/// A live `RTCPeerConnection`, replaced wholesale on rollback.
pub struct RtcTransport {
    api: API,
    config: RTCConfiguration,
    conn: Mutex<Connection>,
}

impl RtcTransport {
    fn to_native(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
        let native = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        native.map_err(|e| TransportError::Description(e.to_string()))
    }

    fn from_native(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
        match desc.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
            other => Err(TransportError::Description(format!("unexpected sdp type {}", other))),
        }
    }

    async fn pc(&self) -> Arc<RTCPeerConnection> {
        self.conn.lock().await.pc.clone()
    }

    /// Create an ordered channel that survives rollback.
    pub async fn open_channel(&self, label: &str) -> Result<RtcDataChannel, TransportError> {
        let mut conn = self.conn.lock().await;
        let dc = conn.pc.create_data_channel(label, Some(ordered())).await?;
        wire_data_channel(&dc, conn.gate.clone());
        let channel = RtcDataChannel::new(dc);
        conn.channels.push((label.to_string(), channel.slot.clone()));
        Ok(channel)
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Self::from_native(self.pc().await.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Self::from_native(self.pc().await.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc().await.set_local_description(Self::to_native(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc().await.set_remote_description(Self::to_native(desc)?).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.lock().await;
        let state = conn.pc.signaling_state();
        if state != RTCSignalingState::HaveLocalOffer {
            return Err(TransportError::Description(format!("nothing to roll back in state {}", state)));
        }

        let gate = conn.gate.next();
        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        wire_peer_connection(&pc, gate.clone());
        for track in &conn.tracks {
            attach_track(&pc, track).await?;
        }
        let mut replacements = Vec::with_capacity(conn.channels.len());
        for (label, slot) in &conn.channels {
            let dc = pc.create_data_channel(label, Some(ordered())).await?;
            wire_data_channel(&dc, gate.clone());
            replacements.push((slot.clone(), dc));
        }

        // Nothing fails past this point; switch over and mute the old connection
        gate.current.store(gate.generation, Ordering::Release);
        for (slot, dc) in replacements {
            *slot.write().unwrap_or_else(PoisonError::into_inner) = dc;
        }
        let old = std::mem::replace(&mut conn.pc, pc);
        conn.gate = gate;
        if let Err(e) = old.close().await {
            debug!("Closing replaced peer connection: {}", e);
        }
        info!("Local offer rolled back; peer connection replaced");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidatePayload) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.unwrap_or_default(),
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc().await.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), TransportError> {
        let mut conn = self.conn.lock().await;
        attach_track(&conn.pc, &track).await?;
        conn.tracks.push(track);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        Ok(Arc::new(self.open_channel(label).await?))
    }

    async fn status(&self) -> ConnectionStatus {
        read_status(&*self.pc().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc().await.close().await?;
        Ok(())
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, gate: EventGate) {
    let label = dc.label().to_string();

    let (open_gate, open_label) = (gate.clone(), label.clone());
    dc.on_open(Box::new(move || {
        open_gate.send(TransportEvent::ChannelOpen { label: open_label });
        Box::pin(async {})
    }));

    let (close_gate, close_label) = (gate.clone(), label.clone());
    dc.on_close(Box::new(move || {
        close_gate.send(TransportEvent::ChannelClosed {
            label: close_label.clone(),
        });
        Box::pin(async {})
    }));

    let error_gate = gate.clone();
    dc.on_error(Box::new(move |err| {
        error_gate.send(TransportEvent::ChannelError {
            label: label.clone(),
            message: err.to_string(),
        });
        Box::pin(async {})
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let message = if msg.is_string {
            ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
        } else {
            ChannelMessage::Binary(msg.data)
        };
        gate.send(TransportEvent::Message(message));
        Box::pin(async {})
    }));
}

/// Handle to an `RTCDataChannel`. Locally created channels are re-pointed
/// at their replacement when the transport rolls back.
pub struct RtcDataChannel {
    slot: ChannelSlot,
    label: String,
}

impl RtcDataChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            label: dc.label().to_string(),
            slot: Arc::new(RwLock::new(dc)),
        }
    }

    fn current(&self) -> Arc<RTCDataChannel> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.current().ready_state() == RTCDataChannelState::Open
    }

    async fn buffered_amount(&self) -> usize {
        self.current().buffered_amount().await
    }

    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        self.current()
            .send_text(text)
            .await
            .map_err(|e| TransferError::Send(e.to_string()))?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError> {
        self.current()
            .send(&data)
            .await
            .map_err(|e| TransferError::Send(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransferError> {
        self.current()
            .close()
            .await
            .map_err(|e| TransferError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn endpoint() -> (RtcTransport, TransportEvents, RtcDataChannel) {
        let (transport, events) = RtcConnector::new(Vec::new()).open().await.unwrap();
        let channel = transport.open_channel("fileTransfer").await.unwrap();
        (transport, events, channel)
    }

    #[tokio::test]
    async fn test_glare_polite_side_rolls_back_and_answers() {
        let (alice, _alice_events, _alice_channel) = endpoint().await;
        let (bob, mut bob_events, bob_channel) = endpoint().await;

        let alice_offer = alice.create_offer().await.unwrap();
        alice.set_local_description(alice_offer.clone()).await.unwrap();
        let bob_offer = bob.create_offer().await.unwrap();
        bob.set_local_description(bob_offer).await.unwrap();
        let before = bob_channel.current();

        // bob yields: his offer goes, alice's is answered
        bob.rollback().await.unwrap();
        let after = bob_channel.current();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.label(), "fileTransfer");
        assert_eq!(bob.pc().await.signaling_state(), RTCSignalingState::Stable);

        bob.set_remote_description(alice_offer).await.unwrap();
        let answer = bob.create_answer().await.unwrap();
        assert!(answer.sdp.contains("m=application"));
        bob.set_local_description(answer.clone()).await.unwrap();
        alice.set_remote_description(answer).await.unwrap();

        assert_eq!(bob.pc().await.signaling_state(), RTCSignalingState::Stable);
        assert_eq!(alice.pc().await.signaling_state(), RTCSignalingState::Stable);

        // the replaced connection was closed without reporting it
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = bob_events.try_recv() {
            assert!(
                !matches!(event, TransportEvent::Status(s) if s.connection == PeerConnectionState::Closed),
                "replaced connection leaked a close"
            );
        }
    }

    #[tokio::test]
    async fn test_rollback_requires_local_offer() {
        let (bob, _events, _channel) = endpoint().await;

        let err = bob.rollback().await.unwrap_err();

        assert!(matches!(err, TransportError::Description(_)));
        assert_eq!(bob.pc().await.signaling_state(), RTCSignalingState::Stable);
    }

    #[tokio::test]
    async fn test_tracks_survive_rollback() {
        let (bob, _events, _channel) = endpoint().await;
        bob.add_track(MediaTrack {
            kind: MediaKind::Audio,
            id: "mic".into(),
            stream_id: "bob".into(),
        })
        .await
        .unwrap();

        let offer = bob.create_offer().await.unwrap();
        bob.set_local_description(offer).await.unwrap();
        bob.rollback().await.unwrap();

        let offer = bob.create_offer().await.unwrap();
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=application"));
    }
}
