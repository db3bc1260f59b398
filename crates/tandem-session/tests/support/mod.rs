#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use url::Url;

use tandem_session::{
    ConnectionStatus, IceConnectionState, IceGatheringState, MediaError, MediaSource, MediaTrack, PeerConnectionState,
    PeerTransport, SdpKind, SessionDescription, SessionEvent, SignalingConnector, SignalingError, SignalingInbound,
    SignalingLink, TransportConnector, TransportError, TransportEvent, TransportEvents,
};
use tandem_transfer::{DataChannel, TransferError};
use tandem_types::{ChannelMessage, IceCandidatePayload, SignalingEnvelope};

type EventTx = mpsc::UnboundedSender<TransportEvent>;

/// Two in-memory transports wired back to back. Connections alternate sides.
#[derive(Default)]
pub struct TransportHub {
    sides: Mutex<[Option<EventTx>; 2]>,
    next: AtomicUsize,
    pub transports: Mutex<Vec<Arc<PairedTransport>>>,
    /// `create_data_channel` fails while set
    pub refuse_channels: AtomicBool,
    /// Channels report a buffered amount no send can drain while set
    pub stall_channels: AtomicBool,
}

impl TransportHub {
    /// Hand `event` to the transport on `side` as if the stack raised it.
    pub fn deliver(&self, side: usize, event: TransportEvent) {
        if let Some(tx) = &self.sides.lock().unwrap()[side] {
            let _ = tx.send(event);
        }
    }
}

pub struct HubConnector(pub Arc<TransportHub>);

#[async_trait]
impl TransportConnector for HubConnector {
    async fn connect(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let side = self.0.next.fetch_add(1, Ordering::SeqCst) % 2;
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.sides.lock().unwrap()[side] = Some(tx);
        let transport = Arc::new(PairedTransport {
            side,
            hub: self.0.clone(),
            calls: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.0.transports.lock().unwrap().push(transport.clone());
        Ok((transport, rx))
    }
}

pub struct PairedTransport {
    side: usize,
    hub: Arc<TransportHub>,
    calls: Mutex<Vec<String>>,
    channel: Mutex<Option<Arc<PairedChannel>>>,
    closed: AtomicBool,
}

impl PairedTransport {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// An applied answer completes negotiation on this side.
    fn negotiated(&self) {
        self.hub.deliver(
            self.side,
            TransportEvent::Status(ConnectionStatus {
                ice: IceConnectionState::Connected,
                connection: PeerConnectionState::Connected,
                gathering: IceGatheringState::Complete,
            }),
        );
        let channel = self.channel.lock().unwrap().clone();
        if let Some(channel) = channel {
            channel.open.store(true, Ordering::SeqCst);
            self.hub.deliver(self.side, TransportEvent::ChannelOpen { label: channel.label.clone() });
        }
    }
}

#[async_trait]
impl PeerTransport for PairedTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!("offer-{}", self.side)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!("answer-{}", self.side)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.record(format!("set_local {:?}", desc.kind));
        self.hub.deliver(
            self.side,
            TransportEvent::LocalCandidate(IceCandidatePayload {
                candidate: Some(format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.side)),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            }),
        );
        if desc.kind == SdpKind::Answer {
            self.negotiated();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.record(format!("set_remote {:?}", desc.kind));
        if desc.kind == SdpKind::Answer {
            self.negotiated();
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        self.record("rollback".into());
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidatePayload) -> Result<(), TransportError> {
        self.record("add_candidate".into());
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), TransportError> {
        self.record(format!("add_track {}", track.kind));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        self.record(format!("create_data_channel {}", label));
        if self.hub.refuse_channels.load(Ordering::SeqCst) {
            return Err(TransportError::Other("no sctp transport".into()));
        }
        let channel = Arc::new(PairedChannel {
            label: label.to_string(),
            side: self.side,
            hub: self.hub.clone(),
            open: AtomicBool::new(false),
        });
        *self.channel.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    async fn status(&self) -> ConnectionStatus {
        ConnectionStatus::default()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct PairedChannel {
    label: String,
    side: usize,
    hub: Arc<TransportHub>,
    open: AtomicBool,
}

#[async_trait]
impl DataChannel for PairedChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn buffered_amount(&self) -> usize {
        if self.hub.stall_channels.load(Ordering::SeqCst) {
            usize::MAX
        } else {
            0
        }
    }

    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        self.hub.deliver(1 - self.side, TransportEvent::Message(ChannelMessage::Text(text)));
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        self.hub.deliver(1 - self.side, TransportEvent::Message(ChannelMessage::Binary(data)));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransferError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Media source that hands out fixed tracks, or fails.
pub struct FixedMedia(pub Option<Vec<MediaTrack>>);

#[async_trait]
impl MediaSource for FixedMedia {
    async fn acquire(&self) -> Result<Vec<MediaTrack>, MediaError> {
        self.0.clone().ok_or_else(|| MediaError("camera unavailable".into()))
    }
}

/// Signaling link whose inbound side is driven by the test.
#[derive(Default)]
pub struct ScriptedSignaling {
    pub sent: Mutex<Vec<SignalingEnvelope>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    open: AtomicBool,
    pub refuse: bool,
}

impl ScriptedSignaling {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    /// Push a raw frame as if the relay had sent it.
    pub fn inject(&self, text: impl Into<String>) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(text.into());
        }
    }

    pub fn sent(&self) -> Vec<SignalingEnvelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingLink for ScriptedSignaling {
    async fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
    }
}

pub struct ScriptedConnector(pub Arc<ScriptedSignaling>);

#[async_trait]
impl SignalingConnector for ScriptedConnector {
    async fn connect(&self, _endpoint: &Url) -> Result<(Arc<dyn SignalingLink>, SignalingInbound), SignalingError> {
        if self.0.refuse {
            return Err(SignalingError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.inbound.lock().unwrap() = Some(tx);
        self.0.open.store(true, Ordering::SeqCst);
        Ok((self.0.clone(), rx))
    }
}

/// Wait for the first event matching `pred`, failing after five seconds.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Poll `check` until it holds, failing after five seconds.
pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
