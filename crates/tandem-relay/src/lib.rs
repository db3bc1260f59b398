/// Tandem relay: room-scoped broadcast signaling over WebSockets.
///
/// The relay never interprets session descriptions or candidates. It tracks
/// which connection is in which room, forwards peer frames verbatim to the
/// rest of the room and synthesizes `user-joined` / `user-left` notices.
pub mod connection;
pub mod rooms;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

pub use rooms::Rooms;

/// `GET /signal` (WebSocket) and `GET /health`.
pub fn router(rooms: Rooms) -> Router {
    Router::new()
        .route("/signal", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(rooms)
}

async fn ws_upgrade(State(rooms): State<Rooms>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, rooms))
}

async fn health() -> &'static str {
    "ok"
}
