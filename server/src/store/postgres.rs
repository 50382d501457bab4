use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

use super::{InsightFilter, InsightKey, MessageQuery, Store, StoreError, StoreResult, TaskFilter};
use crate::types::{
    Channel, ChannelType, ContextItem, Impact, Insight, InsightSource, InsightType, Invite, Member,
    Message, MessageMetadata, Organization, PushSubscriptionPayload, PushSubscriptionRecord, Role,
    SuggestedAction, Task, TaskPriority, TaskState,
};

const CHANNEL_COLUMNS: &str = "id, organization_id, name, description, type, metadata, created_at";
const MESSAGE_COLUMNS: &str =
    "id, channel_id, author_id, content, is_ai_response, metadata, created_at";
const MEMBER_COLUMNS: &str = "id, organization_id, full_name, email, role";
const TASK_COLUMNS: &str = "id, organization_id, title, assignee, state, priority, due_at, \
     source_insight_id, source_channel_id, source_message_id, permalink, created_at";
const INSIGHT_COLUMNS: &str = "id, organization_id, type, title, summary, confidence, impact, owner, \
     sources, suggested_actions, user_role, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_member_row(row: &PgRow) -> Member {
    Member {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        role: Role::parse(&row.get::<String, _>("role")).unwrap_or(Role::Member),
    }
}

fn parse_channel_row(row: &PgRow) -> Channel {
    Channel {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        description: row.get("description"),
        channel_type: ChannelType::parse(&row.get::<String, _>("type"))
            .unwrap_or(ChannelType::Team),
        metadata: row.get::<Json<Value>, _>("metadata").0,
        created_at: row.get("created_at"),
    }
}

fn parse_message_row(row: &PgRow) -> Message {
    let metadata = row.get::<Json<Value>, _>("metadata").0;
    Message {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        author_id: row.get("author_id"),
        content: row.get("content"),
        is_ai_response: row.get("is_ai_response"),
        metadata: serde_json::from_value::<MessageMetadata>(metadata).unwrap_or_default(),
        created_at: row.get("created_at"),
    }
}

fn parse_insight_row(row: &PgRow) -> Insight {
    let sources = row.get::<Json<Value>, _>("sources").0;
    let actions = row.get::<Json<Value>, _>("suggested_actions").0;
    Insight {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        insight_type: InsightType::parse(&row.get::<String, _>("type"))
            .unwrap_or(InsightType::Summary),
        title: row.get("title"),
        summary: row.get("summary"),
        confidence: row.get("confidence"),
        impact: Impact::parse(&row.get::<String, _>("impact")).unwrap_or(Impact::Low),
        owner: row.get("owner"),
        sources: serde_json::from_value::<Vec<InsightSource>>(sources).unwrap_or_default(),
        suggested_actions: serde_json::from_value::<Vec<SuggestedAction>>(actions)
            .unwrap_or_default(),
        user_role: row.get("user_role"),
        created_at: row.get("created_at"),
    }
}

fn parse_context_row(row: &PgRow) -> ContextItem {
    let tags = row.get::<Json<Value>, _>("tags").0;
    ContextItem {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        content: row.get("content"),
        tags: serde_json::from_value::<Vec<String>>(tags).unwrap_or_default(),
        updated_by: row.get("updated_by"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_task_row(row: &PgRow) -> Task {
    Task {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        assignee: row.get("assignee"),
        state: TaskState::parse(&row.get::<String, _>("state")).unwrap_or(TaskState::Open),
        priority: TaskPriority::parse(&row.get::<String, _>("priority"))
            .unwrap_or(TaskPriority::P1),
        due_at: row.get("due_at"),
        source_insight_id: row.get("source_insight_id"),
        source_channel_id: row.get("source_channel_id"),
        source_message_id: row.get("source_message_id"),
        permalink: row.get("permalink"),
        created_at: row.get("created_at"),
    }
}

fn parse_push_row(row: &PgRow) -> Option<PushSubscriptionRecord> {
    let subscription = row.get::<Json<Value>, _>("subscription").0;
    Some(PushSubscriptionRecord {
        user_id: row.get("user_id"),
        organization_id: row.get("organization_id"),
        endpoint: row.get("endpoint"),
        subscription: serde_json::from_value::<PushSubscriptionPayload>(subscription).ok()?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn member_for_token(&self, token_hash: &str) -> StoreResult<Option<Member>> {
        let row = sqlx::query(
            "SELECT p.id, p.organization_id, p.full_name, p.email, p.role \
             FROM auth_tokens t \
             JOIN profiles p ON p.id = t.user_id \
             WHERE t.token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(row.as_ref().map(parse_member_row))
    }

    async fn member(&self, member_id: &str) -> StoreResult<Option<Member>> {
        let row = sqlx::query(&format!("SELECT {MEMBER_COLUMNS} FROM profiles WHERE id = $1"))
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::fetch)?;
        Ok(row.as_ref().map(parse_member_row))
    }

    async fn members(&self, organization_id: &str) -> StoreResult<Vec<Member>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM profiles WHERE organization_id = $1 ORDER BY id"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_member_row).collect())
    }

    async fn organization(&self, organization_id: &str) -> StoreResult<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, created_at FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::fetch)?;
        Ok(row.map(|row| Organization {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    async fn channel(&self, channel_id: &str) -> StoreResult<Option<Channel>> {
        let row = sqlx::query(&format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"))
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::fetch)?;
        Ok(row.as_ref().map(parse_channel_row))
    }

    async fn channels(&self, organization_id: &str) -> StoreResult<Vec<Channel>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE organization_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_channel_row).collect())
    }

    async fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO channels (id, organization_id, name, description, type, metadata, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(&channel.id)
        .bind(&channel.organization_id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.channel_type.as_str())
        .bind(Json(&channel.metadata))
        .bind(channel.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn update_channel(&self, channel: &Channel) -> StoreResult<()> {
        sqlx::query(
            "UPDATE channels SET name = $2, description = $3, type = $4, metadata = $5 WHERE id = $1",
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.channel_type.as_str())
        .bind(Json(&channel.metadata))
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, channel_id, author_id, content, is_ai_response, metadata, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(&message.id)
        .bind(&message.channel_id)
        .bind(&message.author_id)
        .bind(&message.content)
        .bind(message.is_ai_response)
        .bind(Json(&message.metadata))
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::fetch)?;
        Ok(row.as_ref().map(parse_message_row))
    }

    async fn latest_message(&self, channel_id: &str) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(row.as_ref().map(parse_message_row))
    }

    async fn messages(&self, channel_id: &str, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        let limit = query.limit as i64;
        let rows = match (&query.after, &query.before) {
            (None, Some(cursor)) => sqlx::query(&format!(
                "SELECT * FROM ( \
                    SELECT {MESSAGE_COLUMNS} FROM messages \
                    WHERE channel_id = $1 AND (created_at, id) < ($2, $3) \
                    ORDER BY created_at DESC, id DESC LIMIT $4 \
                 ) earlier ORDER BY created_at ASC, id ASC"
            ))
            .bind(channel_id)
            .bind(cursor.created_at)
            .bind(&cursor.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::fetch)?,
            (Some(cursor), _) => sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE channel_id = $1 AND (created_at, id) > ($2, $3) \
                 ORDER BY created_at ASC, id ASC LIMIT $4"
            ))
            .bind(channel_id)
            .bind(cursor.created_at)
            .bind(&cursor.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::fetch)?,
            (None, None) => sqlx::query(&format!(
                "SELECT * FROM ( \
                    SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = $1 \
                    ORDER BY created_at DESC, id DESC LIMIT $2 \
                 ) recent ORDER BY created_at ASC, id ASC"
            ))
            .bind(channel_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::fetch)?,
        };
        Ok(rows.iter().map(parse_message_row).collect())
    }

    async fn messages_since(
        &self,
        channel_ids: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE channel_id = ANY($1) AND created_at >= $2 \
             ORDER BY created_at ASC, id ASC LIMIT $3"
        ))
        .bind(channel_ids)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_message_row).collect())
    }

    async fn contexts(&self, organization_id: &str, limit: usize) -> StoreResult<Vec<ContextItem>> {
        let rows = sqlx::query(
            "SELECT id, organization_id, title, content, tags, updated_by, updated_at \
             FROM contexts WHERE organization_id = $1 \
             ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(organization_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_context_row).collect())
    }

    async fn insert_context(&self, item: &ContextItem) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO contexts (id, organization_id, title, content, tags, updated_by, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) \
             ON CONFLICT (id) DO UPDATE SET \
                title = EXCLUDED.title, \
                content = EXCLUDED.content, \
                tags = EXCLUDED.tags, \
                updated_by = EXCLUDED.updated_by, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&item.id)
        .bind(&item.organization_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(Json(&item.tags))
        .bind(&item.updated_by)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn insert_insight(&self, insight: &Insight, key: Option<&InsightKey>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO insights ( \
                id, organization_id, type, title, summary, confidence, impact, owner, \
                sources, suggested_actions, user_role, source_message_id, category, created_at \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
             ON CONFLICT (organization_id, source_message_id, category) DO NOTHING",
        )
        .bind(&insight.id)
        .bind(&insight.organization_id)
        .bind(insight.insight_type.as_str())
        .bind(&insight.title)
        .bind(&insight.summary)
        .bind(insight.confidence)
        .bind(insight.impact.as_str())
        .bind(&insight.owner)
        .bind(Json(&insight.sources))
        .bind(Json(&insight.suggested_actions))
        .bind(&insight.user_role)
        .bind(key.map(|k| k.source_message_id.as_str()))
        .bind(key.map(|k| k.category.as_str()))
        .bind(insight.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insights(
        &self,
        organization_id: &str,
        filter: &InsightFilter,
    ) -> StoreResult<Vec<Insight>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights \
             WHERE organization_id = $1 \
               AND ($2::text IS NULL OR type = $2) \
               AND ($3::text IS NULL OR impact = $3) \
             ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(filter.insight_type.map(|t| t.as_str()))
        .bind(filter.impact.map(|i| i.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_insight_row).collect())
    }

    async fn upsert_push_subscription(&self, record: &PushSubscriptionRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO push_subscriptions (endpoint, user_id, organization_id, subscription, updated_at) \
             VALUES ($1,$2,$3,$4, now()) \
             ON CONFLICT (endpoint) DO UPDATE SET \
                user_id = EXCLUDED.user_id, \
                organization_id = EXCLUDED.organization_id, \
                subscription = EXCLUDED.subscription, \
                updated_at = now()",
        )
        .bind(&record.endpoint)
        .bind(&record.user_id)
        .bind(&record.organization_id)
        .bind(Json(&record.subscription))
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn delete_push_subscription(&self, user_id: &str, endpoint: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = $1 AND user_id = $2")
                .bind(endpoint)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::insert)?;
        Ok(result.rows_affected() > 0)
    }

    async fn push_subscriptions_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<Vec<PushSubscriptionRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT endpoint, user_id, organization_id, subscription \
             FROM push_subscriptions WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().filter_map(parse_push_row).collect())
    }

    async fn push_subscriptions_for_organization(
        &self,
        organization_id: &str,
    ) -> StoreResult<Vec<PushSubscriptionRecord>> {
        let rows = sqlx::query(
            "SELECT endpoint, user_id, organization_id, subscription \
             FROM push_subscriptions WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().filter_map(parse_push_row).collect())
    }

    async fn invite_sent_since(
        &self,
        organization_id: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM invites \
             WHERE organization_id = $1 AND email = $2 AND emailed_at >= $3",
        )
        .bind(organization_id)
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(count > 0)
    }

    async fn insert_invite(&self, invite: &Invite) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO invites (id, organization_id, email, invite_code, invited_by, role, created_at, expires_at, emailed_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(&invite.id)
        .bind(&invite.organization_id)
        .bind(&invite.email)
        .bind(&invite.invite_code)
        .bind(&invite.invited_by)
        .bind(invite.role.as_str())
        .bind(invite.created_at)
        .bind(invite.expires_at)
        .bind(invite.emailed_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn mark_invite_emailed(&self, invite_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE invites SET emailed_at = $2 WHERE id = $1")
            .bind(invite_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)"
        ))
        .bind(&task.id)
        .bind(&task.organization_id)
        .bind(&task.title)
        .bind(&task.assignee)
        .bind(task.state.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_at)
        .bind(&task.source_insight_id)
        .bind(&task.source_channel_id)
        .bind(&task.source_message_id)
        .bind(&task.permalink)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::insert)?;
        Ok(())
    }

    async fn tasks(&self, organization_id: &str, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE organization_id = $1 \
               AND ($2::text IS NULL OR assignee = $2) \
               AND ($3::text IS NULL OR state = $3) \
             ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(filter.assignee.as_deref())
        .bind(filter.state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::fetch)?;
        Ok(rows.iter().map(parse_task_row).collect())
    }
}
