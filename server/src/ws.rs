//! Websocket sessions: channel message streams and in-app notifications.

use std::sync::{atomic::Ordering, Arc};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::auth::{authenticate_token, bearer_token, Caller};
use crate::error::ApiError;
use crate::notify::watcher::{classify, watched_channels};
use crate::realtime::{SeenMessages, Watch};
use crate::types::{ChannelType, Message};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventEnvelopeIn {
    event: String,
    #[serde(default)]
    data: Value,
}

pub fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

fn emit<T: Serialize>(tx: &mpsc::UnboundedSender<String>, event: &str, data: T) -> bool {
    match event_payload(event, data) {
        Some(payload) => tx.send(payload).is_ok(),
        None => true,
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let caller = authenticate_token(state.store.as_ref(), token.trim()).await?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, caller))
        .into_response())
}

/// Streams `message:new` for every message delivered on `rx`, once per id.
fn spawn_message_forwarder(
    mut rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen = SeenMessages::default();
        while let Some(message) = rx.recv().await {
            if !seen.first_sighting(&message.id) {
                continue;
            }
            if !emit(&tx, "message:new", &message) {
                break;
            }
        }
    })
}

fn spawn_notification_forwarder(
    state: Arc<AppState>,
    caller: Caller,
    mut rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen = SeenMessages::default();
        while let Some(message) = rx.recv().await {
            if !seen.first_sighting(&message.id) {
                continue;
            }
            let channel = match state.store.channel(&message.channel_id).await {
                Ok(Some(channel)) => channel,
                Ok(None) => continue,
                Err(err) => {
                    warn!(channel_id = %message.channel_id, error = %err, "notification lookup failed");
                    continue;
                }
            };
            let reply_author = match message.metadata.reply_to_id.as_deref() {
                Some(parent_id) => match state.store.message(parent_id).await {
                    Ok(parent) => parent.and_then(|p| p.author_id),
                    Err(err) => {
                        warn!(message_id = parent_id, error = %err, "reply parent lookup failed");
                        None
                    }
                },
                None => None,
            };
            let Some(notification) =
                classify(&message, &channel, &caller.member, reply_author.as_deref())
            else {
                continue;
            };
            if !emit(&tx, "notification:new", &notification) {
                break;
            }
        }
    })
}

/// Channel ids from `channels:watch` the caller may read. Unknown or foreign
/// ids are reported back and skipped.
async fn permitted_channels(
    state: &AppState,
    caller: &Caller,
    data: &Value,
    tx: &mpsc::UnboundedSender<String>,
) -> Vec<String> {
    let requested: Vec<String> = data
        .get("channelIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut permitted = Vec::with_capacity(requested.len());
    for channel_id in requested {
        let allowed = match state.store.channel(&channel_id).await {
            Ok(Some(channel)) => {
                channel.organization_id == caller.organization_id
                    && (channel.channel_type != ChannelType::Direct
                        || channel.participants().iter().any(|id| id == caller.user_id()))
            }
            Ok(None) => false,
            Err(err) => {
                warn!(channel_id = %channel_id, error = %err, "channel lookup failed");
                false
            }
        };
        if allowed {
            permitted.push(channel_id);
        } else {
            emit(
                tx,
                "error",
                json!({ "message": "Channel not found", "channelId": channel_id }),
            );
        }
    }
    permitted
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, caller: Caller) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    info!(client_id, user_id = %caller.user_id(), "websocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let (message_tx, message_rx) = mpsc::unbounded_channel::<Message>();
    let mut message_watch = Watch::new(message_tx);
    let message_task = spawn_message_forwarder(message_rx, tx.clone());

    let (notification_tx, notification_rx) = mpsc::unbounded_channel::<Message>();
    let mut notification_watch = Watch::new(notification_tx);
    let notification_task =
        spawn_notification_forwarder(state.clone(), caller.clone(), notification_rx, tx.clone());

    while let Some(Ok(frame)) = ws_receiver.next().await {
        let text = match frame {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            emit(&tx, "error", json!({ "message": "Invalid event envelope" }));
            continue;
        };

        match envelope.event.as_str() {
            "channels:watch" => {
                let channel_ids = permitted_channels(&state, &caller, &envelope.data, &tx).await;
                message_watch.replace(&state.hub, channel_ids).await;
                debug!(client_id, channels = message_watch.channels().len(), "watching channels");
            }
            "notifications:watch" => {
                match state.store.channels(&caller.organization_id).await {
                    Ok(channels) => {
                        let ids = watched_channels(&channels, caller.user_id());
                        notification_watch.replace(&state.hub, ids).await;
                        debug!(
                            client_id,
                            channels = notification_watch.channels().len(),
                            "watching notifications"
                        );
                    }
                    Err(err) => {
                        warn!(client_id, error = %err, "failed to load channels for notifications");
                        emit(&tx, "error", json!({ "message": "Failed to fetch data" }));
                    }
                }
            }
            other => {
                emit(&tx, "error", json!({ "message": format!("Unknown event: {other}") }));
            }
        }
    }

    message_watch.clear(&state.hub).await;
    notification_watch.clear(&state.hub).await;
    message_task.abort();
    notification_task.abort();
    send_task.abort();
    info!(client_id, "websocket disconnected");
}
