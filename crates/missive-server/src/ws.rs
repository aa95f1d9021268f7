//! WebSocket connection lifecycle.
//!
//! One socket per user. The handshake identifies the user through a query
//! parameter; registration in the presence registry happens before the first
//! frame is read, and unregistration is guaranteed on every exit path. Inbound
//! frames carry `ClientEvent`s; unparseable frames are logged and dropped
//! without closing the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use missive_shared::events::{ClientEvent, ServerEvent};
use missive_shared::UserId;

use crate::api::AppState;
use crate::error::ApiError;
use crate::presence::ConnectionHandle;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "userId")]
    user_id: UserId,
}

pub async fn ws_handler(
    upgrade: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| connection_loop(socket, params.user_id, state))
}

async fn connection_loop(socket: WebSocket, user_id: UserId, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn_id = Uuid::new_v4();

    info!(user = %user_id, conn = %conn_id, "WebSocket connected");

    // Registering before reading any frame means the connection observes its
    // own presence broadcast as the first event.
    state
        .presence
        .register(user_id, ConnectionHandle::new(conn_id, tx.clone()))
        .await;

    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound event");
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
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => dispatch(&state, user_id, &tx, event).await,
                            Err(e) => {
                                warn!(user = %user_id, error = %e, "dropping unparseable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong: nothing to do
                    Some(Err(e)) => {
                        debug!(user = %user_id, error = %e, "socket read error");
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    state.presence.unregister(user_id, conn_id).await;
    writer.abort();
    info!(user = %user_id, conn = %conn_id, "WebSocket disconnected");
}

/// Handle one inbound event. Failures are reported back only to the
/// originating connection, as `requestError` events.
async fn dispatch(
    state: &AppState,
    origin: UserId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::SubmitRequest {
            sender_id,
            receiver_id,
        } => {
            if sender_id != origin {
                warn!(origin = %origin, claimed = %sender_id, "spoofed sender id on submitRequest");
                let _ = tx.send(ServerEvent::RequestError {
                    message: "sender does not match connection".to_string(),
                    request_id: None,
                });
                return;
            }
            if let Err(e) = state.requests.submit(sender_id, receiver_id).await {
                let request_id = match &e {
                    ApiError::DuplicateRequest { existing_id } => *existing_id,
                    _ => None,
                };
                let _ = tx.send(ServerEvent::RequestError {
                    message: e.to_string(),
                    request_id,
                });
            }
        }
        ClientEvent::RespondToRequest {
            request_id,
            decision,
        } => {
            if let Err(e) = state.requests.respond(origin, request_id, decision).await {
                let _ = tx.send(ServerEvent::RequestError {
                    message: e.to_string(),
                    request_id: Some(missive_shared::RequestId(request_id)),
                });
            }
        }
        ClientEvent::SendMessageNotice {
            sender_id,
            receiver_id,
            text,
            created_at,
        } => {
            if sender_id != origin {
                debug!(origin = %origin, claimed = %sender_id, "spoofed sender id on notice, dropping");
                return;
            }
            state
                .delivery
                .forward_notice(sender_id, receiver_id, text, created_at)
                .await;
        }
    }
}
