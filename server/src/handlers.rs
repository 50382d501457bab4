use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::app::AppState;
use crate::assistant;
use crate::auth::{authenticate, Caller};
use crate::channels::{self, ChannelPatch, NewMessage};
use crate::contexts;
use crate::error::ApiError;
use crate::insights;
use crate::invite;
use crate::notify;
use crate::policy;
use crate::tasks;
use crate::types::{
    ChannelType, ChatBody, CreateContextBody, CreateInsightBody, DirectChannelBody, InsightsQuery,
    InviteBody, ListMessagesQuery, PatchChannelBody, PolicyCheckBody, PushSendBody,
    PushSubscribeBody, PushSubscriptionRecord, PushUnsubscribeBody, SendMessageBody,
    TaskFromThreadBody, TasksQuery,
};

type ApiResult = Result<Json<Value>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|_| ApiError::bad_request("Invalid JSON body"))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(value)| value)
        .map_err(|_| ApiError::bad_request("Invalid query parameters"))
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    authenticate(state.store.as_ref(), headers).await
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

pub async fn list_channels(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let channels = channels::bootstrap_default_channels(&state, &caller.organization_id)
        .await?
        .into_iter()
        .filter(|channel| match channel.channel_type {
            ChannelType::Direct => channel.participants().iter().any(|id| id == caller.user_id()),
            ChannelType::Team | ChannelType::AiAssistant => true,
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({ "channels": channels })))
}

pub async fn create_direct_channel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DirectChannelBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let target_id = payload.user_id.trim();
    if target_id.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }
    if target_id == caller.user_id() {
        return Err(ApiError::bad_request("Cannot open a direct channel with yourself"));
    }
    let target = state
        .store
        .member(target_id)
        .await?
        .filter(|member| member.organization_id.as_deref() == Some(caller.organization_id.as_str()))
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let channel = channels::get_or_create_direct_channel(
        &state,
        &caller.organization_id,
        &caller.member,
        &target,
    )
    .await?;
    Ok(Json(json!({ "channel": channel })))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    params: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let params = query(params)?;
    let messages = channels::list_messages(
        &state,
        &caller.organization_id,
        &channel_id,
        params.limit,
        params.since_id.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn patch_channel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    payload: Result<Json<PatchChannelBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let channel_type = match payload.channel_type.as_deref() {
        Some(raw) => Some(
            ChannelType::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid channel type"))?,
        ),
        None => None,
    };
    let channel = channels::update_channel(
        &state,
        &caller,
        &channel_id,
        ChannelPatch {
            channel_type,
            description: payload.description,
            metadata: payload.metadata,
        },
    )
    .await?;
    Ok(Json(json!({ "channel": channel })))
}

/// Stores the message, then runs mention detection and, when triggered, the
/// assistant invocation before responding.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let new = NewMessage::from_user(&payload.channel_id, caller.user_id(), &payload.content)
        .replying_to(payload.reply_to_id.filter(|id| !id.trim().is_empty()));
    let (message, channel) =
        channels::create_message(&state, &caller.organization_id, new).await?;

    let assistant =
        match assistant::on_user_message(&state, &caller.organization_id, &message, &channel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(message_id = %message.id, error = %err, "assistant reply was not stored");
                None
            }
        };

    let mut response = json!(message);
    if let Value::Object(fields) = &mut response {
        fields.insert("assistant".to_string(), json!(assistant));
    }
    Ok(Json(response))
}

pub async fn retry_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let outcome = assistant::retry(&state, &caller, &message_id).await?;
    Ok(Json(json!({ "assistant": outcome })))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    Ok(Json(assistant::chat(&state, &caller, payload).await?))
}

pub async fn generate_insights(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let report = insights::generate(&state, &caller).await?;
    Ok(Json(json!(report)))
}

pub async fn list_insights(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<InsightsQuery>, QueryRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let params = query(params)?;
    let items = insights::list(&state, &caller, &params).await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn create_insight(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateInsightBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let item = insights::author(&state, &caller, payload).await?;
    Ok(Json(json!({ "item": item })))
}

pub async fn list_contexts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let items = contexts::list(&state, &caller).await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn create_context(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateContextBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let item = contexts::create(&state, &caller, payload).await?;
    Ok(Json(json!({ "item": item })))
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<TasksQuery>, QueryRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let params = query(params)?;
    let items = tasks::list(&state, &caller, &params).await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn create_task_from_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<TaskFromThreadBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let task = tasks::from_thread(&state, &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))).into_response())
}

pub async fn check_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PolicyCheckBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    Ok(Json(json!(policy::check(&caller, payload)?)))
}

pub async fn push_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PushSubscribeBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let subscription = body(payload)?
        .subscription
        .filter(|s| !s.endpoint.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("subscription is required"))?;
    let record = PushSubscriptionRecord {
        user_id: caller.user_id().to_string(),
        organization_id: caller.organization_id.clone(),
        endpoint: subscription.endpoint.clone(),
        subscription,
    };
    state.store.upsert_push_subscription(&record).await?;
    info!(user_id = %record.user_id, "push subscription saved");
    Ok(Json(json!({ "success": true })))
}

pub async fn push_unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PushUnsubscribeBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let endpoint = payload.endpoint.trim();
    if endpoint.is_empty() {
        return Err(ApiError::bad_request("endpoint is required"));
    }
    let removed = state
        .store
        .delete_push_subscription(caller.user_id(), endpoint)
        .await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

pub async fn push_send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PushSendBody>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let report = notify::send_manual(&state, &caller, payload).await?;
    Ok(Json(json!({ "success": true, "sent": report.delivered })))
}

pub async fn vapid_public_key(State(state): State<Arc<AppState>>) -> ApiResult {
    let vapid = state
        .config
        .vapid
        .as_ref()
        .ok_or_else(|| ApiError::ServerConfig("Push notifications are not configured".to_string()))?;
    Ok(Json(json!({ "publicKey": vapid.public_key })))
}

pub async fn send_invites(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<InviteBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers).await?;
    let payload = body(payload)?;
    let report = invite::send_invites(&state, &caller, payload).await?;
    if report.all_failed() {
        let message = match report.failed.as_slice() {
            [only] => only.error.clone().unwrap_or_default(),
            _ => "Failed to create invites".to_string(),
        };
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": { "code": "SERVER_ERROR", "message": message },
                "details": report.failed,
            })),
        )
            .into_response());
    }
    Ok(Json(json!(report)).into_response())
}
