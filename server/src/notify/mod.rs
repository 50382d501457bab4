//! Push fan-out for newly stored messages.

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::types::{Channel, ChannelType, Member, Message, PushSendBody, PushSubscriptionRecord};

pub mod push;
pub mod watcher;

use push::PushError;

pub const BODY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PushData>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub recipients: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// At most `BODY_LIMIT` characters, ending in `...` when shortened.
pub fn truncate_body(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= BODY_LIMIT {
        return text.to_string();
    }
    let kept: String = text.chars().take(BODY_LIMIT - 3).collect();
    format!("{}...", kept.trim_end())
}

/// Who should hear about `message`: the other direct participants, or every
/// organization member except the author.
pub fn recipients(channel: &Channel, message: &Message, members: &[Member]) -> Vec<String> {
    let author = message.author_id.as_deref();
    let mut ids: Vec<String> = match channel.channel_type {
        ChannelType::Direct => channel.participants(),
        ChannelType::Team | ChannelType::AiAssistant => {
            members.iter().map(|member| member.id.clone()).collect()
        }
    };
    ids.retain(|id| Some(id.as_str()) != author);
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}

pub fn message_payload(
    channel: &Channel,
    message: &Message,
    author_name: &str,
) -> PushPayload {
    let title = match channel.channel_type {
        ChannelType::Direct => format!("New message from {author_name}"),
        _ => format!("#{}", channel.name),
    };
    PushPayload {
        title,
        body: truncate_body(&message.content),
        url: "/".to_string(),
        tag: format!("channel-{}", channel.id),
        data: Some(PushData {
            channel_id: channel.id.clone(),
            message_id: message.id.clone(),
        }),
    }
}

async fn author_name(state: &AppState, channel: &Channel, message: &Message) -> String {
    let Some(author_id) = message.author_id.as_deref() else {
        return state.config.assistant_name.clone();
    };
    if let Some(name) = channel.participant_name(author_id) {
        return name;
    }
    match state.store.member(author_id).await {
        Ok(Some(member)) => member.display_name(),
        _ => "Someone".to_string(),
    }
}

/// Sends `payload` to every subscription, isolating failures per endpoint.
pub async fn deliver(
    state: &AppState,
    subscriptions: &[PushSubscriptionRecord],
    payload: &PushPayload,
) -> Result<DispatchReport, PushError> {
    let sender = state.push.as_ref().ok_or(PushError::NotConfigured)?;
    let body = serde_json::to_vec(payload).map_err(|err| PushError::Payload(err.to_string()))?;

    let results = join_all(subscriptions.iter().map(|record| {
        let body = body.as_slice();
        async move { (record, sender.send(&record.subscription, body).await) }
    }))
    .await;

    let mut report = DispatchReport {
        attempted: subscriptions.len(),
        ..DispatchReport::default()
    };
    for (record, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(PushError::Gone) => {
                report.failed += 1;
                info!(endpoint = %record.endpoint, "push endpoint expired, removing");
                if let Err(err) = state
                    .store
                    .delete_push_subscription(&record.user_id, &record.endpoint)
                    .await
                {
                    warn!(endpoint = %record.endpoint, error = %err, "failed to remove expired subscription");
                }
            }
            Err(err) => {
                report.failed += 1;
                warn!(endpoint = %record.endpoint, user_id = %record.user_id, error = %err, "push delivery failed");
            }
        }
    }
    Ok(report)
}

/// Awaited from the insert path. Never fails the enclosing request.
pub async fn on_message_created(state: &AppState, message: &Message, channel: &Channel) -> DispatchReport {
    let members = match channel.channel_type {
        ChannelType::Direct => Vec::new(),
        _ => match state.store.members(&channel.organization_id).await {
            Ok(members) => members,
            Err(err) => {
                error!(channel_id = %channel.id, error = %err, "failed to load recipients");
                return DispatchReport::default();
            }
        },
    };
    let recipient_ids = recipients(channel, message, &members);
    let mut report = DispatchReport {
        recipients: recipient_ids.len(),
        ..DispatchReport::default()
    };
    if recipient_ids.is_empty() {
        return report;
    }
    if state.push.is_none() {
        debug!(channel_id = %channel.id, "push not configured, skipping dispatch");
        return report;
    }

    let subscriptions = match state.store.push_subscriptions_for_users(&recipient_ids).await {
        Ok(subscriptions) => subscriptions,
        Err(err) => {
            error!(channel_id = %channel.id, error = %err, "failed to load push subscriptions");
            return report;
        }
    };
    if subscriptions.is_empty() {
        return report;
    }

    let name = author_name(state, channel, message).await;
    let payload = message_payload(channel, message, &name);
    match deliver(state, &subscriptions, &payload).await {
        Ok(delivery) => {
            report.attempted = delivery.attempted;
            report.delivered = delivery.delivered;
            report.failed = delivery.failed;
        }
        Err(err) => warn!(channel_id = %channel.id, error = %err, "push dispatch skipped"),
    }
    debug!(
        channel_id = %channel.id,
        message_id = %message.id,
        delivered = report.delivered,
        failed = report.failed,
        "push dispatch finished"
    );
    report
}

/// Operator-triggered push to one member, a whole organization, or the caller.
pub async fn send_manual(
    state: &AppState,
    caller: &Caller,
    body: PushSendBody,
) -> Result<DispatchReport, ApiError> {
    let title = body.title.trim();
    let text = body.body.trim();
    if title.is_empty() || text.is_empty() {
        return Err(ApiError::bad_request("title and body are required"));
    }
    if state.push.is_none() {
        return Err(ApiError::ServerConfig(
            "Push notifications are not configured".to_string(),
        ));
    }

    let user_id = body.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    let organization_id = body
        .organization_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let subscriptions = match (user_id, organization_id) {
        (Some(user_id), _) => {
            if user_id != caller.user_id() {
                caller.require_manager()?;
                let member = state.store.member(user_id).await?;
                if member.and_then(|m| m.organization_id).as_deref()
                    != Some(caller.organization_id.as_str())
                {
                    return Err(ApiError::not_found("User not found"));
                }
            }
            state
                .store
                .push_subscriptions_for_users(&[user_id.to_string()])
                .await?
        }
        (None, Some(organization_id)) => {
            if organization_id != caller.organization_id {
                return Err(ApiError::forbidden("Not a member of this organization"));
            }
            caller.require_manager()?;
            state
                .store
                .push_subscriptions_for_organization(organization_id)
                .await?
        }
        (None, None) => {
            state
                .store
                .push_subscriptions_for_users(&[caller.user_id().to_string()])
                .await?
        }
    };

    let payload = PushPayload {
        title: title.to_string(),
        body: truncate_body(text),
        url: body.url.clone().unwrap_or_else(|| "/".to_string()),
        tag: format!("manual-{}", uuid::Uuid::new_v4()),
        data: None,
    };
    let report = deliver(state, &subscriptions, &payload)
        .await
        .map_err(|err| ApiError::Server(err.to_string()))?;
    info!(
        attempted = report.attempted,
        delivered = report.delivered,
        "manual push sent"
    );
    Ok(report)
}
