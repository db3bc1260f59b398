use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tandem_relay::{Rooms, router};
use tandem_types::{SignalPayload, SignalingEnvelope};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Rooms::new())).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/signal", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, room: &str, from: &str, payload: SignalPayload) {
    let text = SignalingEnvelope::new(room, from, payload).to_text().unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> SignalingEnvelope {
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for frame");
    SignalingEnvelope::from_text(&frame).unwrap()
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

#[tokio::test]
async fn test_join_notifies_both_sides() {
    let addr = spawn_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, "r1", "alice", SignalPayload::Join).await;
    // ensure alice's join is processed first
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut bob, "r1", "bob", SignalPayload::Join).await;

    let to_alice = recv(&mut alice).await;
    assert_eq!(to_alice.payload, SignalPayload::UserJoined);
    assert_eq!(to_alice.display_name, "bob");
    assert_eq!(to_alice.room_id, "r1");

    let to_bob = recv(&mut bob).await;
    assert_eq!(to_bob.payload, SignalPayload::UserJoined);
    assert_eq!(to_bob.display_name, "alice");
}

#[tokio::test]
async fn test_peer_frames_relayed_verbatim_within_room() {
    let addr = spawn_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    let mut carol = connect(addr).await;

    send(&mut alice, "r1", "alice", SignalPayload::Join).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut bob, "r1", "bob", SignalPayload::Join).await;
    send(&mut carol, "r2", "carol", SignalPayload::Join).await;
    recv(&mut alice).await;
    recv(&mut bob).await;

    send(&mut alice, "r1", "alice", SignalPayload::Offer { sdp: "v=0 offer".into() }).await;

    let offer = recv(&mut bob).await;
    assert_eq!(offer.display_name, "alice");
    assert_eq!(offer.payload, SignalPayload::Offer { sdp: "v=0 offer".into() });
    assert_silent(&mut alice).await;
    assert_silent(&mut carol).await;
}

#[tokio::test]
async fn test_malformed_frames_ignored() {
    let addr = spawn_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    send(&mut alice, "r1", "alice", SignalPayload::Join).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut bob, "r1", "bob", SignalPayload::Join).await;
    recv(&mut alice).await;
    recv(&mut bob).await;

    alice.send(Message::Text("{broken".to_string().into())).await.unwrap();
    alice
        .send(Message::Text(r#"{"type":"shout","roomId":"r1"}"#.to_string().into()))
        .await
        .unwrap();
    send(&mut alice, "r1", "alice", SignalPayload::Answer { sdp: "v=0 answer".into() }).await;

    // the connection survives and only the valid frame arrives
    let answer = recv(&mut bob).await;
    assert_eq!(answer.payload, SignalPayload::Answer { sdp: "v=0 answer".into() });
}

#[tokio::test]
async fn test_leave_and_disconnect_notify_room() {
    let addr = spawn_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    send(&mut alice, "r1", "alice", SignalPayload::Join).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut bob, "r1", "bob", SignalPayload::Join).await;
    recv(&mut alice).await;
    recv(&mut bob).await;

    send(&mut bob, "r1", "bob", SignalPayload::Leave).await;
    let left = recv(&mut alice).await;
    assert_eq!(left.payload, SignalPayload::UserLeft);
    assert_eq!(left.display_name, "bob");

    send(&mut bob, "r1", "bob", SignalPayload::Join).await;
    let joined = recv(&mut alice).await;
    assert_eq!(joined.payload, SignalPayload::UserJoined);
    recv(&mut bob).await;

    drop(bob);
    let dropped = recv(&mut alice).await;
    assert_eq!(dropped.payload, SignalPayload::UserLeft);
    assert_eq!(dropped.display_name, "bob");
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_relay().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));
}
