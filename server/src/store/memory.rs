//! In-memory `Store` used by `WORKSPACE_STORE=memory` and the tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tracing::trace;

use super::{
    InsightFilter, InsightKey, MessageQuery, Store, StoreError, StoreResult, TaskFilter,
};
use crate::auth::sha256_hex;
use crate::types::{
    Channel, ContextItem, Insight, Invite, Member, Message, Organization, PushSubscriptionRecord,
    Task,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    organizations: DashMap<String, Organization>,
    members: DashMap<String, Member>,
    tokens: DashMap<String, String>,
    channels: DashMap<String, Channel>,
    messages: DashMap<String, Message>,
    contexts: DashMap<String, ContextItem>,
    insights: DashMap<String, Insight>,
    insight_keys: DashSet<(String, InsightKey)>,
    push_subscriptions: DashMap<String, PushSubscriptionRecord>,
    invites: DashMap<String, Invite>,
    tasks: DashMap<String, Task>,
    rejected_insight_sources: DashSet<String>,
    fail_context_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_organization(&self, organization: Organization) {
        self.organizations
            .insert(organization.id.clone(), organization);
    }

    pub fn insert_member(&self, member: Member) {
        self.members.insert(member.id.clone(), member);
    }

    /// Registers a bearer token for `user_id`, stored hashed like the session table.
    pub fn insert_token(&self, token: &str, user_id: &str) {
        self.tokens.insert(sha256_hex(token), user_id.to_string());
    }

    /// Makes every insight sourced from `message_id` fail to insert.
    pub fn reject_insights_from(&self, message_id: &str) {
        self.rejected_insight_sources.insert(message_id.to_string());
    }

    /// Makes `contexts` return a fetch error until reset.
    pub fn set_fail_context_reads(&self, fail: bool) {
        self.fail_context_reads.store(fail, Ordering::SeqCst);
    }

    pub fn insight_count(&self) -> usize {
        self.insights.len()
    }

    pub fn invites_for(&self, organization_id: &str) -> Vec<Invite> {
        self.invites
            .iter()
            .filter(|entry| entry.organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn sorted_channel_messages(&self, channel_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| entry.channel_id == channel_id)
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        messages
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn member_for_token(&self, token_hash: &str) -> StoreResult<Option<Member>> {
        let Some(user_id) = self.tokens.get(token_hash).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        Ok(self.members.get(&user_id).map(|entry| entry.value().clone()))
    }

    async fn member(&self, member_id: &str) -> StoreResult<Option<Member>> {
        Ok(self.members.get(member_id).map(|entry| entry.value().clone()))
    }

    async fn members(&self, organization_id: &str) -> StoreResult<Vec<Member>> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .filter(|entry| entry.organization_id.as_deref() == Some(organization_id))
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    async fn organization(&self, organization_id: &str) -> StoreResult<Option<Organization>> {
        Ok(self
            .organizations
            .get(organization_id)
            .map(|entry| entry.value().clone()))
    }

    async fn channel(&self, channel_id: &str) -> StoreResult<Option<Channel>> {
        Ok(self.channels.get(channel_id).map(|entry| entry.value().clone()))
    }

    async fn channels(&self, organization_id: &str) -> StoreResult<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|entry| entry.organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect();
        channels.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(channels)
    }

    async fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        if self.channels.contains_key(&channel.id) {
            return Err(StoreError::Conflict(format!("channel {} exists", channel.id)));
        }
        self.channels.insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    async fn update_channel(&self, channel: &Channel) -> StoreResult<()> {
        match self.channels.get_mut(&channel.id) {
            Some(mut entry) => {
                *entry = channel.clone();
                Ok(())
            }
            None => Err(StoreError::Insert(format!("channel {} missing", channel.id))),
        }
    }

    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        trace!(message_id = %message.id, channel_id = %message.channel_id, "memory insert message");
        if self.messages.contains_key(&message.id) {
            return Err(StoreError::Conflict(format!("message {} exists", message.id)));
        }
        self.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        Ok(self.messages.get(message_id).map(|entry| entry.value().clone()))
    }

    async fn latest_message(&self, channel_id: &str) -> StoreResult<Option<Message>> {
        Ok(self.sorted_channel_messages(channel_id).pop())
    }

    async fn messages(&self, channel_id: &str, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        let mut messages = self.sorted_channel_messages(channel_id);
        if let Some(cursor) = &query.before {
            messages.retain(|m| m.order_key() < (cursor.created_at, cursor.id.as_str()));
        }
        let page = match &query.after {
            Some(cursor) => messages
                .into_iter()
                .filter(|m| m.order_key() > (cursor.created_at, cursor.id.as_str()))
                .take(query.limit)
                .collect(),
            None => {
                let skip = messages.len().saturating_sub(query.limit);
                messages.into_iter().skip(skip).collect()
            }
        };
        Ok(page)
    }

    async fn messages_since(
        &self,
        channel_ids: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| entry.created_at >= since && channel_ids.contains(&entry.channel_id))
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn contexts(&self, organization_id: &str, limit: usize) -> StoreResult<Vec<ContextItem>> {
        if self.fail_context_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Fetch("context reads disabled".to_string()));
        }
        let mut items: Vec<ContextItem> = self
            .contexts
            .iter()
            .filter(|entry| entry.organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn insert_context(&self, item: &ContextItem) -> StoreResult<()> {
        self.contexts.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn insert_insight(&self, insight: &Insight, key: Option<&InsightKey>) -> StoreResult<bool> {
        if let Some(key) = key {
            if self.rejected_insight_sources.contains(&key.source_message_id) {
                return Err(StoreError::Insert(format!(
                    "insight rejected for message {}",
                    key.source_message_id
                )));
            }
            if !self
                .insight_keys
                .insert((insight.organization_id.clone(), key.clone()))
            {
                return Ok(false);
            }
        }
        self.insights.insert(insight.id.clone(), insight.clone());
        Ok(true)
    }

    async fn insights(
        &self,
        organization_id: &str,
        filter: &InsightFilter,
    ) -> StoreResult<Vec<Insight>> {
        let mut items: Vec<Insight> = self
            .insights
            .iter()
            .filter(|entry| entry.organization_id == organization_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn upsert_push_subscription(&self, record: &PushSubscriptionRecord) -> StoreResult<()> {
        self.push_subscriptions
            .insert(record.endpoint.clone(), record.clone());
        Ok(())
    }

    async fn delete_push_subscription(&self, user_id: &str, endpoint: &str) -> StoreResult<bool> {
        Ok(self
            .push_subscriptions
            .remove_if(endpoint, |_, record| record.user_id == user_id)
            .is_some())
    }

    async fn push_subscriptions_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<Vec<PushSubscriptionRecord>> {
        Ok(self
            .push_subscriptions
            .iter()
            .filter(|entry| user_ids.contains(&entry.user_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn push_subscriptions_for_organization(
        &self,
        organization_id: &str,
    ) -> StoreResult<Vec<PushSubscriptionRecord>> {
        Ok(self
            .push_subscriptions
            .iter()
            .filter(|entry| entry.organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn invite_sent_since(
        &self,
        organization_id: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.invites.iter().any(|entry| {
            entry.organization_id == organization_id
                && entry.email == email
                && entry.emailed_at.is_some_and(|at| at >= since)
        }))
    }

    async fn insert_invite(&self, invite: &Invite) -> StoreResult<()> {
        self.invites.insert(invite.id.clone(), invite.clone());
        Ok(())
    }

    async fn mark_invite_emailed(&self, invite_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        match self.invites.get_mut(invite_id) {
            Some(mut invite) => {
                invite.emailed_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::Insert(format!("invite {invite_id} not found"))),
        }
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(format!("task {} exists", task.id)));
        }
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn tasks(&self, organization_id: &str, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.organization_id == organization_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}
