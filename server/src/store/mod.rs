//! Persistence seam between the workspace protocols and storage.
//!
//! `PgStore` is the production backend; `MemoryStore` carries the same
//! semantics for `WORKSPACE_STORE=memory` and the test-suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Channel, ContextItem, Impact, Insight, InsightType, Invite, Member, Message, Organization,
    PushSubscriptionRecord, Task, TaskState,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("conflicting write: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Fetch(err.to_string())
    }

    pub fn insert(err: impl std::fmt::Display) -> Self {
        Self::Insert(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Position of a message in its channel's read order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl From<&Message> for Cursor {
    fn from(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id.clone(),
        }
    }
}

/// Without cursors, the latest `limit` messages. With `after`, the first `limit`
/// messages strictly after it. With `before`, the latest `limit` messages strictly
/// before it. Results are always ascending.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub limit: usize,
    pub after: Option<Cursor>,
    pub before: Option<Cursor>,
}

impl MessageQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn after(cursor: Option<Cursor>, limit: usize) -> Self {
        Self {
            limit,
            after: cursor,
            ..Self::default()
        }
    }

    pub fn before(cursor: Cursor, limit: usize) -> Self {
        Self {
            limit,
            before: Some(cursor),
            ..Self::default()
        }
    }
}

/// Idempotency key for extracted insights.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsightKey {
    pub source_message_id: String,
    pub category: InsightType,
}

#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub insight_type: Option<InsightType>,
    pub impact: Option<Impact>,
}

impl InsightFilter {
    pub fn matches(&self, insight: &Insight) -> bool {
        self.insight_type.map_or(true, |t| insight.insight_type == t)
            && self.impact.map_or(true, |i| insight.impact == i)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub assignee: Option<String>,
    pub state: Option<TaskState>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.assignee.as_deref().map_or(true, |a| task.assignee == a)
            && self.state.map_or(true, |s| task.state == s)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolves a session token hash (`sha256_hex(bearer)`) to its member.
    async fn member_for_token(&self, token_hash: &str) -> StoreResult<Option<Member>>;
    async fn member(&self, member_id: &str) -> StoreResult<Option<Member>>;
    async fn members(&self, organization_id: &str) -> StoreResult<Vec<Member>>;
    async fn organization(&self, organization_id: &str) -> StoreResult<Option<Organization>>;

    async fn channel(&self, channel_id: &str) -> StoreResult<Option<Channel>>;
    /// All channels of an organization, oldest first.
    async fn channels(&self, organization_id: &str) -> StoreResult<Vec<Channel>>;
    async fn insert_channel(&self, channel: &Channel) -> StoreResult<()>;
    async fn update_channel(&self, channel: &Channel) -> StoreResult<()>;

    async fn insert_message(&self, message: &Message) -> StoreResult<()>;
    async fn message(&self, message_id: &str) -> StoreResult<Option<Message>>;
    async fn latest_message(&self, channel_id: &str) -> StoreResult<Option<Message>>;
    async fn messages(&self, channel_id: &str, query: &MessageQuery) -> StoreResult<Vec<Message>>;
    /// Messages across `channel_ids` created at or after `since`, ascending, capped at `limit`.
    async fn messages_since(
        &self,
        channel_ids: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    /// Most recently updated first.
    async fn contexts(&self, organization_id: &str, limit: usize) -> StoreResult<Vec<ContextItem>>;
    async fn insert_context(&self, item: &ContextItem) -> StoreResult<()>;

    /// Returns `false` when `key` was already used and nothing was written.
    async fn insert_insight(&self, insight: &Insight, key: Option<&InsightKey>) -> StoreResult<bool>;
    /// Newest first.
    async fn insights(&self, organization_id: &str, filter: &InsightFilter)
        -> StoreResult<Vec<Insight>>;

    async fn upsert_push_subscription(&self, record: &PushSubscriptionRecord) -> StoreResult<()>;
    async fn delete_push_subscription(&self, user_id: &str, endpoint: &str) -> StoreResult<bool>;
    async fn push_subscriptions_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<Vec<PushSubscriptionRecord>>;
    async fn push_subscriptions_for_organization(
        &self,
        organization_id: &str,
    ) -> StoreResult<Vec<PushSubscriptionRecord>>;

    /// Only invites whose email went out count towards the resend limit.
    async fn invite_sent_since(
        &self,
        organization_id: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn insert_invite(&self, invite: &Invite) -> StoreResult<()>;
    async fn mark_invite_emailed(&self, invite_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn insert_task(&self, task: &Task) -> StoreResult<()>;
    /// Newest first.
    async fn tasks(&self, organization_id: &str, filter: &TaskFilter) -> StoreResult<Vec<Task>>;
}
