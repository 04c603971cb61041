//! WebSocket endpoint.
//!
//! Clients send `{"type":"join", ...}` with the join shape of their role, or
//! `{"type":"leave","room":"zone:4"}`. The server pushes
//! `{"event": name, "data": payload}` frames; join and leave are answered
//! with `joined`/`left`, and bad messages with `error`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use common::{ConnectionId, Principal, RoomKey};
use futures_util::{SinkExt, StreamExt};
use realtime::{Gateway, OutboundMessage};
use serde::Deserialize;
use serde_json::{Value, json};
use storage::CommerceStore;

use crate::AppState;
use crate::identity::Caller;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Join(Value),
    Leave { room: RoomKey },
}

/// GET /ws
pub async fn upgrade<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| session(socket, gateway, principal))
}

async fn session(socket: WebSocket, gateway: Gateway, principal: Principal) {
    let (connection, mut outbound) = gateway.connect().await;
    let (mut sink, mut inbound) = socket.split();
    tracing::info!(%connection, role = %principal.role, user_id = %principal.id, "socket connected");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, event = %message.event, "unserializable outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text(&gateway, &principal, connection, text.as_str()).await;
                    gateway.reply(connection, reply).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%connection, error = %e, "socket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    match gateway.disconnect(connection).await {
        Ok(rooms) => tracing::info!(%connection, rooms = rooms.len(), "socket disconnected"),
        Err(e) => tracing::warn!(%connection, error = %e, "disconnect cleanup failed; reaper will retry"),
    }
}

async fn handle_text(
    gateway: &Gateway,
    principal: &Principal,
    connection: ConnectionId,
    text: &str,
) -> OutboundMessage {
    let reply = |event: &str, data: Value| OutboundMessage {
        event: event.to_string(),
        data,
    };

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Join(request)) => {
            match gateway.join(principal, connection, &request).await {
                Ok(rooms) => reply("joined", json!({ "rooms": rooms })),
                Err(e) => reply("error", json!({ "error": e.to_string() })),
            }
        }
        Ok(ClientMessage::Leave { room }) => match gateway.leave(connection, room).await {
            Ok(_) => reply("left", json!({ "room": room })),
            Err(e) => reply("error", json!({ "error": e.to_string() })),
        },
        Err(e) => reply("error", json!({ "error": format!("invalid message: {e}") })),
    }
}
