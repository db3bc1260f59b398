use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use tandem_types::SignalingEnvelope;

use crate::error::SignalingError;

/// Raw text frames received from the relay, in arrival order.
pub type SignalingInbound = mpsc::UnboundedReceiver<String>;

/// Outbound half of the signaling connection.
#[async_trait]
pub trait SignalingLink: Send + Sync {
    async fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<(Arc<dyn SignalingLink>, SignalingInbound), SignalingError>;
}

/// WebSocket signaling over `tokio-tungstenite`.
pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<(Arc<dyn SignalingLink>, SignalingInbound), SignalingError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        info!("Signaling connected to {}", endpoint);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        // Writer: drains queued frames in order; a Close frame ends it
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    debug!("Signaling write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_open.store(false, Ordering::Release);
            let _ = ws_tx.close().await;
        });

        // Reader: forwards text frames until the socket closes
        let reader_cancel = cancel.clone();
        let reader_open = open.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = ws_rx.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.as_str().to_owned()).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Signaling read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            reader_open.store(false, Ordering::Release);
        });

        let link = WsLink { out_tx, open, cancel };
        Ok((Arc::new(link), in_rx))
    }
}

struct WsLink {
    out_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

#[async_trait]
impl SignalingLink for WsLink {
    async fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::Closed);
        }
        let text = envelope.to_text()?;
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| SignalingError::Closed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            // Writer flushes everything queued before the Close frame
            let _ = self.out_tx.send(Message::Close(None));
        }
        self.cancel.cancel();
    }
}
