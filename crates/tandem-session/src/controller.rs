use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_transfer::{
    ChunkedReceiver, ChunkedSender, DataChannel, Delivery, FileSink, OutgoingFile, ProgressBoard, SendReport,
    TransferError,
};
use tandem_types::{FILE_CHANNEL_LABEL, SignalPayload, SignalingEnvelope};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::negotiation::{CandidateOutcome, NegotiationEngine, OfferOutcome};
use crate::role::Role;
use crate::session::Session;
use crate::signaling::{SignalingConnector, SignalingInbound, SignalingLink};
use crate::status::ConnectionStatusTracker;
use crate::transport::{MediaSource, MediaTrack, PeerTransport, TransportConnector, TransportEvent, TransportEvents};

/// Observable session milestones.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined { room_id: String, local_id: String },
    PeerJoined { remote_id: String, role: Role },
    PeerLeft { remote_id: String },
    /// A recoverable negotiation failure; the session continues
    NegotiationWarning { message: String },
    ChannelOpen { label: String },
    ChannelClosed { label: String },
    RemoteTrack(MediaTrack),
    FileReceived(Delivery),
    SignalingClosed,
    Left,
}

/// Top-level orchestrator: one room membership at a time.
///
/// All session state is owned by a single event-loop task started on join.
/// The controller itself only holds handles to that task and the resources
/// it must tear down on leave.
pub struct SessionController {
    config: SessionConfig,
    transports: Arc<dyn TransportConnector>,
    signaling: Arc<dyn SignalingConnector>,
    media: Option<Arc<dyn MediaSource>>,
    sink: Arc<dyn FileSink>,
    events: broadcast::Sender<SessionEvent>,
    status: ConnectionStatusTracker,
    outgoing: ProgressBoard,
    incoming: ProgressBoard,
    session_tx: Arc<watch::Sender<Option<Session>>>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    room_id: String,
    local_id: String,
    cancel: CancellationToken,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingLink>,
    channel: Arc<dyn DataChannel>,
    sender: Arc<ChunkedSender>,
    event_loop: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transports: Arc<dyn TransportConnector>,
        signaling: Arc<dyn SignalingConnector>,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (session_tx, _) = watch::channel(None);
        Self {
            config,
            transports,
            signaling,
            media: None,
            sink,
            events,
            status: ConnectionStatusTracker::new(),
            outgoing: ProgressBoard::new(),
            incoming: ProgressBoard::new(),
            session_tx: Arc::new(session_tx),
            active: Mutex::new(None),
        }
    }

    /// Attach local tracks from `media` on every join.
    pub fn with_media(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> &ConnectionStatusTracker {
        &self.status
    }

    pub fn outgoing_progress(&self) -> &ProgressBoard {
        &self.outgoing
    }

    pub fn incoming_progress(&self) -> &ProgressBoard {
        &self.incoming
    }

    /// Copy of the current session, `None` when not joined.
    pub fn session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    pub async fn is_joined(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn is_channel_open(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.channel.is_open())
    }

    /// Join `room_id` as `local_id`. Any previous membership is left first.
    ///
    /// On failure every resource created so far is released and the error is returned.
    pub async fn join(&self, room_id: &str, local_id: &str) -> Result<(), SessionError> {
        self.leave().await;
        let mut active = self.active.lock().await;

        let (transport, transport_rx) = self.transports.connect().await?;

        if let Err(e) = self.attach_media(transport.as_ref()).await {
            teardown(None, &transport, None).await;
            return Err(e);
        }

        let channel = match transport.create_data_channel(FILE_CHANNEL_LABEL).await {
            Ok(channel) => channel,
            Err(e) => {
                teardown(None, &transport, None).await;
                return Err(e.into());
            }
        };

        let (signaling, signaling_rx) = match self.signaling.connect(&self.config.endpoint).await {
            Ok(pair) => pair,
            Err(e) => {
                teardown(Some(&channel), &transport, None).await;
                return Err(e.into());
            }
        };

        let join = SignalingEnvelope::new(room_id, local_id, SignalPayload::Join);
        if let Err(e) = signaling.send(&join).await {
            teardown(Some(&channel), &transport, Some(&signaling)).await;
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let sender = Arc::new(
            ChunkedSender::new(channel.clone(), self.config.transfer, self.outgoing.clone())
                .with_cancellation(cancel.child_token()),
        );
        let receiver = ChunkedReceiver::new(
            self.sink.clone(),
            self.incoming.clone(),
            self.config.transfer.completion_delay,
        );

        let session = Session::new(room_id, local_id);
        self.session_tx.send_replace(Some(session.clone()));

        let event_loop = tokio::spawn(
            EventLoop {
                engine: NegotiationEngine::new(session),
                receiver,
                transport: transport.clone(),
                signaling: signaling.clone(),
                events: self.events.clone(),
                status: self.status.clone(),
                session_tx: self.session_tx.clone(),
                accepted: Vec::new(),
            }
            .run(signaling_rx, transport_rx, cancel.clone()),
        );
        let poller = self
            .status
            .spawn_poller(transport.clone(), self.config.status_poll_interval, cancel.clone());

        info!("Joined room {} as {}", room_id, local_id);
        let _ = self.events.send(SessionEvent::Joined {
            room_id: room_id.to_string(),
            local_id: local_id.to_string(),
        });

        *active = Some(ActiveSession {
            room_id: room_id.to_string(),
            local_id: local_id.to_string(),
            cancel,
            transport,
            signaling,
            channel,
            sender,
            event_loop,
            poller,
        });
        Ok(())
    }

    /// Leave the room. Safe to call at any time, any number of times.
    pub async fn leave(&self) {
        let active = self.active.lock().await.take();

        if let Some(active) = active {
            if active.signaling.is_open() {
                let leave = SignalingEnvelope::new(&active.room_id, &active.local_id, SignalPayload::Leave);
                if let Err(e) = active.signaling.send(&leave).await {
                    debug!("Leave notification not sent: {}", e);
                }
            }

            active.cancel.cancel();
            active.event_loop.abort();
            active.poller.abort();
            let _ = active.event_loop.await;
            let _ = active.poller.await;

            teardown(Some(&active.channel), &active.transport, Some(&active.signaling)).await;

            info!("Left room {}", active.room_id);
            let _ = self.events.send(SessionEvent::Left);
        }

        self.outgoing.clear();
        self.incoming.clear();
        self.status.reset();
        self.session_tx.send_replace(None);
    }

    /// Send one file and wait for it to finish.
    pub async fn send_file(&self, file: OutgoingFile) -> Result<SendReport, SessionError> {
        let sender = self.sender().await?;
        Ok(sender.send(file).await?)
    }

    /// Start one concurrent send per file.
    pub async fn send_files(
        &self,
        files: Vec<OutgoingFile>,
    ) -> Result<Vec<JoinHandle<Result<SendReport, TransferError>>>, SessionError> {
        let sender = self.sender().await?;
        Ok(files
            .into_iter()
            .map(|file| {
                let sender = sender.clone();
                tokio::spawn(async move { sender.send(file).await })
            })
            .collect())
    }

    async fn sender(&self) -> Result<Arc<ChunkedSender>, SessionError> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.sender.clone())
            .ok_or(SessionError::NotJoined)
    }

    async fn attach_media(&self, transport: &dyn PeerTransport) -> Result<(), SessionError> {
        let Some(media) = &self.media else {
            return Ok(());
        };
        for track in media.acquire().await? {
            debug!("Attaching local {} track {}", track.kind, track.id);
            transport.add_track(track).await?;
        }
        Ok(())
    }
}

/// Close whatever exists. Errors are logged, never returned.
async fn teardown(
    channel: Option<&Arc<dyn DataChannel>>,
    transport: &Arc<dyn PeerTransport>,
    signaling: Option<&Arc<dyn SignalingLink>>,
) {
    if let Some(channel) = channel {
        if let Err(e) = channel.close().await {
            debug!("Closing data channel: {}", e);
        }
    }
    if let Err(e) = transport.close().await {
        debug!("Closing transport: {}", e);
    }
    if let Some(signaling) = signaling {
        signaling.close().await;
    }
}

/// Single owner of the session state while joined.
struct EventLoop {
    engine: NegotiationEngine,
    receiver: ChunkedReceiver,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingLink>,
    events: broadcast::Sender<SessionEvent>,
    status: ConnectionStatusTracker,
    session_tx: Arc<watch::Sender<Option<Session>>>,
    /// Channels opened by the remote side, kept alive for their inbound messages
    accepted: Vec<Arc<dyn DataChannel>>,
}

impl EventLoop {
    async fn run(mut self, mut signaling_rx: SignalingInbound, mut transport_rx: TransportEvents, cancel: CancellationToken) {
        let mut signaling_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = signaling_rx.recv(), if signaling_open => match frame {
                    Some(text) => self.handle_signal(&text).await,
                    None => {
                        warn!("Signaling connection closed");
                        signaling_open = false;
                        self.emit(SessionEvent::SignalingClosed);
                    }
                },
                event = transport_rx.recv() => match event {
                    Some(event) => self.handle_transport(event).await,
                    None => {
                        debug!("Transport event stream ended");
                        break;
                    }
                },
            }
            self.publish_session();
        }
        self.receiver.reset();
    }

    async fn handle_signal(&mut self, text: &str) {
        let envelope = match SignalingEnvelope::from_text(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let raw: String = text.chars().take(200).collect();
                warn!("Dropping malformed signaling message: {} -- raw: {}", e, raw);
                return;
            }
        };

        let from = envelope.display_name;
        let transport = self.transport.as_ref();
        let signaling = self.signaling.as_ref();
        match envelope.payload {
            SignalPayload::UserJoined => match self.engine.on_peer_joined(&from, transport, signaling).await {
                Ok(role) => self.emit(SessionEvent::PeerJoined { remote_id: from, role }),
                Err(e) => self.warn(format!("offer to {} failed: {}", from, e)),
            },
            SignalPayload::Offer { sdp } => match self.engine.on_offer(&from, sdp, transport, signaling).await {
                Ok(OfferOutcome::Ignored) => debug!("Offer from {} ignored", from),
                Ok(outcome) => debug!("Offer from {} handled: {:?}", from, outcome),
                Err(e) => self.warn(format!("offer from {} failed: {}", from, e)),
            },
            SignalPayload::Answer { sdp } => {
                if let Err(e) = self.engine.on_answer(sdp, transport).await {
                    self.warn(format!("answer from {} failed: {}", from, e));
                }
            }
            SignalPayload::IceCandidate { candidate } => match self.engine.on_ice_candidate(candidate, transport).await {
                Ok(CandidateOutcome::Suppressed) => debug!("Candidate from {} suppressed", from),
                Ok(_) => {}
                Err(e) => self.warn(format!("candidate from {} rejected: {}", from, e)),
            },
            SignalPayload::UserLeft => {
                info!("{} left the room", from);
                self.engine.on_peer_left(&from);
                self.emit(SessionEvent::PeerLeft { remote_id: from });
            }
            SignalPayload::Join | SignalPayload::Leave => {
                debug!("Ignoring relayed join/leave from {}", from);
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let session = self.engine.session();
                let envelope = SignalingEnvelope::new(
                    &session.room_id,
                    &session.local_id,
                    SignalPayload::IceCandidate { candidate },
                );
                if let Err(e) = self.signaling.send(&envelope).await {
                    debug!("Local candidate not sent: {}", e);
                }
            }
            TransportEvent::ChannelAccepted(channel) => {
                info!("Accepted remote data channel {}", channel.label());
                self.accepted.push(channel);
            }
            TransportEvent::ChannelOpen { label } => {
                info!("Data channel {} open", label);
                self.emit(SessionEvent::ChannelOpen { label });
            }
            TransportEvent::ChannelClosed { label } => {
                info!("Data channel {} closed", label);
                self.emit(SessionEvent::ChannelClosed { label });
            }
            TransportEvent::ChannelError { label, message } => {
                warn!("Data channel {} error: {}", label, message);
            }
            TransportEvent::Message(msg) => {
                if let Some(delivery) = self.receiver.handle_message(msg).await {
                    self.emit(SessionEvent::FileReceived(delivery));
                }
            }
            TransportEvent::RemoteTrack(track) => {
                info!("Remote {} track {}", track.kind, track.id);
                self.emit(SessionEvent::RemoteTrack(track));
            }
            TransportEvent::Status(status) => {
                self.status.observe(status);
            }
        }
    }

    fn warn(&self, message: String) {
        warn!("{}", message);
        self.emit(SessionEvent::NegotiationWarning { message });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish_session(&self) {
        let session = self.engine.session();
        self.session_tx.send_if_modified(|current| {
            if current.as_ref() == Some(session) {
                return false;
            }
            *current = Some(session.clone());
            true
        });
    }
}
