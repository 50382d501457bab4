use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    Team,
    Direct,
    AiAssistant,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Team => "team",
            ChannelType::Direct => "direct",
            ChannelType::AiAssistant => "ai-assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "team" => Some(ChannelType::Team),
            "direct" => Some(ChannelType::Direct),
            "ai-assistant" => Some(ChannelType::AiAssistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Participant ids recorded in `metadata.participants`, in stored order.
    pub fn participants(&self) -> Vec<String> {
        self.metadata
            .get("participants")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn participant_name(&self, user_id: &str) -> Option<String> {
        self.metadata
            .get("participantNames")
            .and_then(|names| names.get(user_id))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// True when this is a direct channel whose participant set is exactly `{a, b}`.
    pub fn is_direct_between(&self, a: &str, b: &str) -> bool {
        if self.channel_type != ChannelType::Direct {
            return false;
        }
        let mut participants = self.participants();
        participants.sort();
        participants.dedup();
        let mut wanted = vec![a.to_string(), b.to_string()];
        wanted.sort();
        wanted.dedup();
        participants == wanted
    }

    /// Shallow merge: keys present in `patch` overwrite, everything else is kept.
    pub fn merge_metadata(&mut self, patch: &Map<String, Value>) {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(Map::new());
        }
        if let Some(existing) = self.metadata.as_object_mut() {
            for (key, value) in patch {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author_id: Option<String>,
    pub content: String,
    pub is_ai_response: bool,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Read-order key within a channel.
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author_id.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }

    /// Owners and admins may invite and perform delete-type actions.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub organization_id: Option<String>,
    pub full_name: Option<String>,
    pub email: String,
    pub role: Role,
}

impl Member {
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.email
                    .split('@')
                    .next()
                    .unwrap_or("Someone")
                    .to_string()
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Decision,
    Risk,
    Blocker,
    Trend,
    Summary,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Decision => "decision",
            InsightType::Risk => "risk",
            InsightType::Blocker => "blocker",
            InsightType::Trend => "trend",
            InsightType::Summary => "summary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "decision" => Some(InsightType::Decision),
            "risk" => Some(InsightType::Risk),
            "blocker" => Some(InsightType::Blocker),
            "trend" => Some(InsightType::Trend),
            "summary" => Some(InsightType::Summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    High,
    Medium,
    Low,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Critical => "critical",
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "critical" => Some(Impact::Critical),
            "high" => Some(Impact::High),
            "medium" => Some(Impact::Medium),
            "low" => Some(Impact::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightSource {
    pub label: String,
    pub url: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionIntent {
    Primary,
    #[default]
    Secondary,
    Ghost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub intent: ActionIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub organization_id: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub title: String,
    pub summary: String,
    pub confidence: f64,
    pub impact: Impact,
    pub owner: String,
    #[serde(default)]
    pub sources: Vec<InsightSource>,
    #[serde(default)]
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Organization-authored grounding record injected into assistant prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Browser `PushSubscription` JSON as produced by `subscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionPayload {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionRecord {
    pub user_id: String,
    pub organization_id: String,
    pub endpoint: String,
    pub subscription: PushSubscriptionPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Mention,
    Reply,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub channel_id: String,
    pub message_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub invite_code: String,
    pub invited_by: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the invite email was accepted by the mail server.
    pub emailed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub since_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChannelBody {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchChannelBody {
    #[serde(default, rename = "type")]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContextBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsQuery {
    #[serde(default, rename = "type")]
    pub insight_type: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInsightBody {
    #[serde(default, rename = "type")]
    pub insight_type: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<Value>,
    #[serde(default)]
    pub suggested_actions: Vec<Value>,
    #[serde(default)]
    pub user_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushSubscribeBody {
    pub subscription: Option<PushSubscriptionPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PushUnsubscribeBody {
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSendBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteBody {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub emails: Option<Vec<String>>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub organization_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Open => "open",
            TaskState::InProgress => "in_progress",
            TaskState::Done => "done",
            TaskState::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "open" => Some(TaskState::Open),
            "in_progress" => Some(TaskState::InProgress),
            "done" => Some(TaskState::Done),
            "blocked" => Some(TaskState::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    P0,
    P1,
    P2,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::P0 => "p0",
            TaskPriority::P1 => "p1",
            TaskPriority::P2 => "p2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "p0" => Some(TaskPriority::P0),
            "p1" => Some(TaskPriority::P1),
            "p2" => Some(TaskPriority::P2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub assignee: String,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_insight_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TasksQuery {
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFromThreadBody {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyResource {
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PolicyCheckBody {
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub resource: Option<PolicyResource>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Display-name lookup stored next to direct-channel participants.
pub fn participant_names(members: &[&Member]) -> HashMap<String, String> {
    members
        .iter()
        .map(|member| (member.id.clone(), member.display_name()))
        .collect()
}
