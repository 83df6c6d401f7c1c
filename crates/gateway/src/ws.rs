//! WebSocket endpoint.
//!
//! Flow:
//! 1. Client connects to `/ws` and receives `connected`.
//! 2. Text frames pass the guard in [`crate::protocol::parse_text_frame`]
//!    and dispatch into the session; malformed frames get an error reply
//!    but never close the connection.
//! 3. Binary, ping, and pong frames are consumed at the frame layer.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{invalid_json, parse_text_frame, Outbound};
use crate::session::{handle_inbound, Session};
use crate::state::AppState;

/// GET /ws — upgrade to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let mut session = Session::new(client_id.clone(), tx);

    tracing::info!(client_id = %client_id, "client connected");
    session.send(Outbound::Connected {
        client_id: client_id.clone(),
    });

    // Writer task: forwards outbound frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: one inbound message at a time; a turn in flight
    // blocks further messages from this client, which is exactly the
    // one-in-flight-turn-per-session rule.
    while let Some(Ok(frame)) = ws_stream.next().await {
        match frame {
            Message::Text(text) => match parse_text_frame(&text) {
                Ok(inbound) => handle_inbound(&state, &mut session, inbound).await,
                Err(()) => session.send(invalid_json()),
            },
            Message::Close(_) => break,
            // Consumed at the frame layer, never surfaced to the JSON
            // handler.
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.abort();
    tracing::info!(client_id = %client_id, "client disconnected");
}
