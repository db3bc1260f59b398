use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::PeerTransport;

/// Default sampling interval for [`ConnectionStatusTracker::spawn_poller`].
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        })
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        })
    }
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        })
    }
}

/// Normalized connectivity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub ice: IceConnectionState,
    pub connection: PeerConnectionState,
    pub gathering: IceGatheringState,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.connection == PeerConnectionState::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ice={} connection={} gathering={}", self.ice, self.connection, self.gathering)
    }
}

/// Tracks the transport's connectivity.
///
/// Fed by push notifications ([`observe`](Self::observe)) and by a poller
/// that samples the transport. Observers only see actual changes.
#[derive(Clone)]
pub struct ConnectionStatusTracker {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionStatusTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    /// Record a status. Returns whether it differed from the previous one.
    pub fn observe(&self, status: ConnectionStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            debug!("Connection status: {}", status);
        }
        changed
    }

    pub fn reset(&self) {
        self.observe(ConnectionStatus::default());
    }

    /// Sample `transport` every `interval` until `cancel` fires.
    pub fn spawn_poller(
        &self,
        transport: Arc<dyn PeerTransport>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tracker.observe(transport.status().await);
                    }
                }
            }
        })
    }
}

impl Default for ConnectionStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
