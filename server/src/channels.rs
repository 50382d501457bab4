//! Channel and message operations shared by HTTP handlers, the assistant and tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::notify;
use crate::store::{Cursor, MessageQuery};
use crate::types::{Channel, ChannelType, Member, Message, MessageMetadata, participant_names};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Serializes inserts per channel and hands out strictly increasing timestamps.
#[derive(Default)]
pub struct ChannelSequencer {
    channels: DashMap<String, Arc<Mutex<Option<DateTime<Utc>>>>>,
}

impl ChannelSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, channel_id: &str) -> OwnedMutexGuard<Option<DateTime<Utc>>> {
        let slot = self
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .value()
            .clone();
        slot.lock_owned().await
    }
}

/// Next timestamp for a channel whose newest message is `previous`.
/// Microsecond precision, matching what Postgres stores.
pub fn next_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or(now);
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: String,
    pub author_id: Option<String>,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub used_fallback: bool,
}

impl NewMessage {
    pub fn from_user(channel_id: &str, author_id: &str, content: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            author_id: Some(author_id.to_string()),
            content: content.to_string(),
            reply_to_id: None,
            used_fallback: false,
        }
    }

    pub fn from_assistant(channel_id: &str, content: &str, used_fallback: bool) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            author_id: None,
            content: content.to_string(),
            reply_to_id: None,
            used_fallback,
        }
    }

    pub fn replying_to(mut self, reply_to_id: Option<String>) -> Self {
        self.reply_to_id = reply_to_id.filter(|id| !id.trim().is_empty());
        self
    }
}

/// Loads a channel the organization owns. Other tenants' channels are reported as missing.
pub async fn owned_channel(
    state: &AppState,
    organization_id: &str,
    channel_id: &str,
) -> Result<Channel, ApiError> {
    match state.store.channel(channel_id).await? {
        Some(channel) if channel.organization_id == organization_id => Ok(channel),
        _ => Err(ApiError::not_found("Channel not found")),
    }
}

/// Validates, sequences, persists and publishes one message, then awaits push dispatch.
pub async fn create_message(
    state: &AppState,
    organization_id: &str,
    new: NewMessage,
) -> Result<(Message, Channel), ApiError> {
    let content = new.content.trim();
    if new.channel_id.trim().is_empty() || content.is_empty() {
        return Err(ApiError::bad_request("channelId and content are required"));
    }

    let channel = owned_channel(state, organization_id, new.channel_id.trim()).await?;

    if let Some(reply_to_id) = new.reply_to_id.as_deref() {
        let parent = state.store.message(reply_to_id).await?;
        if parent.map(|m| m.channel_id != channel.id).unwrap_or(true) {
            return Err(ApiError::bad_request(
                "replyToId must reference a message in this channel",
            ));
        }
    }

    let message = {
        let mut last = state.sequencer.lock(&channel.id).await;
        if last.is_none() {
            *last = state
                .store
                .latest_message(&channel.id)
                .await?
                .map(|m| m.created_at);
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel.id.clone(),
            is_ai_response: new.author_id.is_none(),
            author_id: new.author_id.clone(),
            content: content.to_string(),
            metadata: MessageMetadata {
                reply_to_id: new.reply_to_id.clone(),
                used_fallback: new.used_fallback,
            },
            created_at: next_timestamp(*last, Utc::now()),
        };
        state.store.insert_message(&message).await?;
        *last = Some(message.created_at);
        state.hub.publish(&message).await;
        message
    };

    debug!(
        channel_id = %channel.id,
        message_id = %message.id,
        ai = message.is_ai_response,
        "message stored"
    );

    notify::on_message_created(state, &message, &channel).await;
    Ok((message, channel))
}

pub async fn list_messages(
    state: &AppState,
    organization_id: &str,
    channel_id: &str,
    limit: Option<usize>,
    since_id: Option<&str>,
) -> Result<Vec<Message>, ApiError> {
    let channel = owned_channel(state, organization_id, channel_id).await?;
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let after = match since_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(since_id) => match state.store.message(since_id).await? {
            Some(anchor) if anchor.channel_id == channel.id => Some(Cursor::from(&anchor)),
            _ => return Err(ApiError::bad_request("sinceId is not a message in this channel")),
        },
        None => None,
    };

    Ok(state
        .store
        .messages(&channel.id, &MessageQuery::after(after, limit))
        .await?)
}

/// Returns the direct channel between `a` and `b`, creating it when none exists.
///
/// Lookup-before-create is not atomic across requests: two concurrent first
/// requests may both create a channel. Reads always resolve to the oldest
/// matching channel, so both callers converge on it afterwards.
pub async fn get_or_create_direct_channel(
    state: &AppState,
    organization_id: &str,
    a: &Member,
    b: &Member,
) -> Result<Channel, ApiError> {
    if let Some(existing) = find_direct_channel(state, organization_id, &a.id, &b.id).await? {
        return Ok(existing);
    }

    let names = participant_names(&[a, b]);
    let channel = Channel {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.to_string(),
        name: format!("{}, {}", a.display_name(), b.display_name()),
        description: None,
        channel_type: ChannelType::Direct,
        metadata: json!({
            "participants": [a.id, b.id],
            "participantNames": names,
        }),
        created_at: Utc::now(),
    };
    state.store.insert_channel(&channel).await?;
    info!(channel_id = %channel.id, organization_id, "direct channel created");
    Ok(channel)
}

pub async fn find_direct_channel(
    state: &AppState,
    organization_id: &str,
    a: &str,
    b: &str,
) -> Result<Option<Channel>, ApiError> {
    Ok(state
        .store
        .channels(organization_id)
        .await?
        .into_iter()
        .filter(|channel| channel.is_direct_between(a, b))
        .min_by(|x, y| (x.created_at, &x.id).cmp(&(y.created_at, &y.id))))
}

/// Ensures the organization has its default team and assistant channels.
pub async fn bootstrap_default_channels(
    state: &AppState,
    organization_id: &str,
) -> Result<Vec<Channel>, ApiError> {
    let mut channels = state.store.channels(organization_id).await?;
    let defaults = [
        (ChannelType::Team, "general", "Company-wide announcements and chat"),
        (
            ChannelType::AiAssistant,
            "ai-assistant",
            "Ask the assistant about your workspace",
        ),
    ];
    for (channel_type, name, description) in defaults {
        if channels.iter().any(|c| c.channel_type == channel_type) {
            continue;
        }
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            channel_type,
            metadata: json!({}),
            created_at: Utc::now(),
        };
        state.store.insert_channel(&channel).await?;
        info!(channel_id = %channel.id, organization_id, name, "default channel created");
        channels.push(channel);
    }
    Ok(channels)
}

pub struct ChannelPatch {
    pub channel_type: Option<ChannelType>,
    pub description: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

pub async fn update_channel(
    state: &AppState,
    caller: &Caller,
    channel_id: &str,
    patch: ChannelPatch,
) -> Result<Channel, ApiError> {
    caller.require_manager()?;
    let mut channel = owned_channel(state, &caller.organization_id, channel_id).await?;
    if let Some(channel_type) = patch.channel_type {
        channel.channel_type = channel_type;
    }
    if let Some(description) = patch.description {
        channel.description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
    }
    if let Some(metadata) = patch.metadata.as_ref() {
        channel.merge_metadata(metadata);
    }
    state.store.update_channel(&channel).await?;
    info!(channel_id = %channel.id, kind = channel.channel_type.as_str(), "channel updated");
    Ok(channel)
}
