//! Follow-up tasks, listed per organization or spun out of a chat thread.

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::channels;
use crate::error::ApiError;
use crate::policy;
use crate::store::TaskFilter;
use crate::types::{Message, Task, TaskFromThreadBody, TaskPriority, TaskState, TasksQuery};

pub const UNASSIGNED: &str = "Unassigned";
const THREAD_TASK_DUE_HOURS: i64 = 4;
const TITLE_EXCERPT_LEN: usize = 80;

/// `assignee=me` resolves to the caller's display name.
fn parse_filter(caller: &Caller, query: &TasksQuery) -> Result<TaskFilter, ApiError> {
    let assignee = match query.assignee.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        Some("me") => Some(caller.member.display_name()),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let state = match query.state.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(TaskState::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid state"))?),
        None => None,
    };
    Ok(TaskFilter { assignee, state })
}

pub async fn list(
    state: &AppState,
    caller: &Caller,
    query: &TasksQuery,
) -> Result<Vec<Task>, ApiError> {
    let filter = parse_filter(caller, query)?;
    Ok(state.store.tasks(&caller.organization_id, &filter).await?)
}

fn thread_title(root: &Message) -> String {
    let text: String = root.content.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= TITLE_EXCERPT_LEN {
        return format!("Follow up on thread: {text}");
    }
    let excerpt: String = text.chars().take(TITLE_EXCERPT_LEN - 3).collect();
    format!("Follow up on thread: {}...", excerpt.trim_end())
}

/// Resolves a reply to the message that started its thread.
async fn thread_root(state: &AppState, message: Message) -> Result<Message, ApiError> {
    let Some(parent_id) = message.metadata.reply_to_id.as_deref() else {
        return Ok(message);
    };
    match state.store.message(parent_id).await? {
        Some(parent) if parent.channel_id == message.channel_id => Ok(parent),
        _ => Ok(message),
    }
}

pub async fn from_thread(
    state: &AppState,
    caller: &Caller,
    body: TaskFromThreadBody,
) -> Result<Task, ApiError> {
    let channel_id = body.channel_id.trim();
    let message_id = body.message_id.trim();
    if channel_id.is_empty() || message_id.is_empty() {
        return Err(ApiError::bad_request("channelId and messageId are required"));
    }
    policy::authorize(caller, "tasks.create")?;
    let channel = channels::owned_channel(state, &caller.organization_id, channel_id).await?;
    let message = state
        .store
        .message(message_id)
        .await?
        .filter(|m| m.channel_id == channel.id)
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    let root = thread_root(state, message).await?;

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        organization_id: caller.organization_id.clone(),
        title: thread_title(&root),
        assignee: UNASSIGNED.to_string(),
        state: TaskState::Open,
        priority: TaskPriority::P1,
        due_at: Some(now + Duration::hours(THREAD_TASK_DUE_HOURS)),
        source_insight_id: None,
        source_channel_id: Some(channel.id.clone()),
        source_message_id: Some(root.id.clone()),
        permalink: Some(format!(
            "{}/channels/{}?thread={}",
            state.config.app_base_url, channel.id, root.id
        )),
        created_at: now,
    };
    state.store.insert_task(&task).await?;
    info!(task_id = %task.id, channel_id = %channel.id, message_id = %root.id, "task created from thread");
    Ok(task)
}
