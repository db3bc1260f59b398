use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_types::{SignalPayload, SignalingEnvelope};

use crate::rooms::{FrameSender, Rooms};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Display name used when a join carries none.
const ANONYMOUS: &str = "unknown";

/// Serve one signaling client until it disconnects.
pub async fn handle_connection(socket: WebSocket, rooms: Rooms) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    debug!("Signaling client {} connected", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Queued frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client frames -> rooms
    let recv_rooms = rooms.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&recv_rooms, conn_id, &tx, text.as_str()).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some((room_id, display_name)) = rooms.leave(conn_id).await {
        info!("{} dropped out of room {}", display_name, room_id);
        announce(&rooms, &room_id, conn_id, &display_name, SignalPayload::UserLeft).await;
    }
    debug!("Signaling client {} disconnected", conn_id);
}

async fn handle_frame(rooms: &Rooms, conn_id: Uuid, tx: &FrameSender, text: &str) {
    let envelope = match SignalingEnvelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let raw: String = text.chars().take(200).collect();
            warn!("{} bad signaling frame: {} -- raw: {}", conn_id, e, raw);
            return;
        }
    };

    let room_id = envelope.room_id.as_str();
    match envelope.payload {
        SignalPayload::Join => {
            let display_name = if envelope.display_name.is_empty() {
                ANONYMOUS
            } else {
                envelope.display_name.as_str()
            };
            let (existing, previous) = rooms.join(room_id, conn_id, display_name, tx.clone()).await;
            if let Some((old_room, old_name)) = previous {
                announce(rooms, &old_room, conn_id, &old_name, SignalPayload::UserLeft).await;
            }
            info!("{} joined room {} ({} already present)", display_name, room_id, existing.len());

            announce(rooms, room_id, conn_id, display_name, SignalPayload::UserJoined).await;

            // The newcomer learns about everyone already in the room
            for name in existing {
                let event = SignalingEnvelope::new(room_id, name, SignalPayload::UserJoined);
                match event.to_text() {
                    Ok(text) => {
                        let _ = tx.send(text);
                    }
                    Err(e) => warn!("Failed to encode user-joined: {}", e),
                }
            }
        }

        SignalPayload::Leave => {
            if rooms.room_of(conn_id).await.as_deref() != Some(room_id) {
                return;
            }
            if let Some((room_id, display_name)) = rooms.leave(conn_id).await {
                info!("{} left room {}", display_name, room_id);
                announce(rooms, &room_id, conn_id, &display_name, SignalPayload::UserLeft).await;
            }
        }

        ref payload if payload.is_peer_relayed() => {
            if rooms.room_of(conn_id).await.as_deref() != Some(room_id) {
                debug!("{} sent {} for room {} without joining it", conn_id, payload.kind(), room_id);
                return;
            }
            let delivered = rooms.send_to_others(room_id, conn_id, text).await;
            debug!(
                "{} -> {} relayed to {} member(s) of {}",
                envelope.display_name,
                payload.kind(),
                delivered,
                room_id
            );
        }

        payload => {
            debug!("{} sent relay-only {} frame, ignoring", conn_id, payload.kind());
        }
    }
}

/// Send a relay-synthesized notice about `display_name` to the rest of the room.
async fn announce(rooms: &Rooms, room_id: &str, conn_id: Uuid, display_name: &str, payload: SignalPayload) {
    let event = SignalingEnvelope::new(room_id, display_name, payload);
    match event.to_text() {
        Ok(text) => {
            rooms.send_to_others(room_id, conn_id, &text).await;
        }
        Err(e) => warn!("Failed to encode {}: {}", event.payload.kind(), e),
    }
}
