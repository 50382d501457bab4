//! Keyword-rule insight extraction over recent team-channel messages.
//!
//! Matching is plain lower-cased substring search. It is a coarse detector,
//! so "on fire" meaning enthusiasm still reads as a risk.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::mention::MentionDetector;
use crate::store::{InsightFilter, InsightKey};
use crate::types::{
    ActionIntent, Channel, ChannelType, CreateInsightBody, Impact, Insight, InsightSource,
    InsightType, InsightsQuery, Message, SuggestedAction,
};

pub const SUMMARY_LIMIT: usize = 280;

const RISK_KEYWORDS: &[&str] = &[
    "blocker", "blocked", "outage", "on fire", "downtime", "incident", "critical", "sev1",
];
const DECISION_KEYWORDS: &[&str] = &[
    "decision:", "we decided", "final call", "ship it", "go ahead", "approved",
];
const TREND_KEYWORDS: &[&str] = &[
    "profit",
    "profits",
    "revenue",
    "mrr",
    "growth",
    "improved",
    "accelerating",
    "velocity",
    "ahead of target",
];

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub risk: Vec<String>,
    pub decision: Vec<String>,
    pub trend: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        let owned = |words: &[&str]| -> Vec<String> { words.iter().map(|w| w.to_string()).collect() };
        Self {
            risk: owned(RISK_KEYWORDS),
            decision: owned(DECISION_KEYWORDS),
            trend: owned(TREND_KEYWORDS),
        }
    }
}

impl RuleSet {
    /// Matched categories in risk, decision, trend order. Risk suppresses trend.
    pub fn classify(&self, content: &str) -> Vec<InsightType> {
        let lower = content.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| lower.contains(w.as_str()));
        let risk = hit(&self.risk);
        let mut categories = Vec::new();
        if risk {
            categories.push(InsightType::Risk);
        }
        if hit(&self.decision) {
            categories.push(InsightType::Decision);
        }
        if !risk && hit(&self.trend) {
            categories.push(InsightType::Trend);
        }
        categories
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub category: InsightType,
    pub title: String,
    pub summary: String,
    pub confidence: f64,
    pub impact: Impact,
    pub source: InsightSource,
}

impl InsightDraft {
    pub fn key(&self) -> InsightKey {
        InsightKey {
            source_message_id: self.source.message_id.clone().unwrap_or_default(),
            category: self.category,
        }
    }

    fn into_insight(self, organization_id: &str, owner: &str) -> Insight {
        Insight {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            insight_type: self.category,
            title: self.title,
            summary: self.summary,
            confidence: self.confidence,
            impact: self.impact,
            owner: owner.to_string(),
            sources: vec![self.source],
            suggested_actions: Vec::new(),
            user_role: None,
            created_at: Utc::now(),
        }
    }
}

pub fn truncate_summary(text: &str) -> String {
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let kept: String = text.chars().take(SUMMARY_LIMIT - 3).collect();
    format!("{kept}...")
}

fn draft_for(category: InsightType, message: &Message, channel_name: &str) -> InsightDraft {
    let (title, confidence, impact) = match category {
        InsightType::Risk => (format!("Potential risk in #{channel_name}"), 0.7, Impact::High),
        InsightType::Decision => (format!("Decision in #{channel_name}"), 0.8, Impact::Medium),
        _ => (format!("Positive signal in #{channel_name}"), 0.8, Impact::Low),
    };
    InsightDraft {
        category,
        title,
        summary: truncate_summary(&message.content),
        confidence,
        impact,
        source: InsightSource {
            label: format!("Message in #{channel_name}"),
            url: format!("#messages:{}", message.id),
            timestamp: message
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            channel: Some(message.channel_id.clone()),
            message_id: Some(message.id.clone()),
        },
    }
}

/// Pure classification pass. Assistant prompts and assistant output are not signals.
pub fn extract(
    messages: &[Message],
    channel_names: &HashMap<String, String>,
    rules: &RuleSet,
    mention: &MentionDetector,
) -> Vec<InsightDraft> {
    messages
        .iter()
        .filter(|m| !m.is_ai_response && !mention.is_mentioned(&m.content))
        .flat_map(|m| {
            let channel_name = channel_names
                .get(&m.channel_id)
                .map(String::as_str)
                .unwrap_or("channel");
            rules
                .classify(&m.content)
                .into_iter()
                .map(move |category| draft_for(category, m, channel_name))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    pub created: usize,
    pub scanned: usize,
    pub channel_count: usize,
    pub message_count: usize,
}

/// Scans the trailing window and persists new drafts. Safe to re-run: drafts
/// already stored for the same message and category are skipped.
pub async fn generate(state: &AppState, caller: &Caller) -> Result<GenerateReport, ApiError> {
    let organization_id = caller.organization_id.as_str();
    let team_channels: Vec<Channel> = state
        .store
        .channels(organization_id)
        .await?
        .into_iter()
        .filter(|c| c.channel_type == ChannelType::Team)
        .collect();
    let mut report = GenerateReport {
        channel_count: team_channels.len(),
        ..GenerateReport::default()
    };
    if team_channels.is_empty() {
        return Ok(report);
    }

    let channel_ids: Vec<String> = team_channels.iter().map(|c| c.id.clone()).collect();
    let channel_names: HashMap<String, String> = team_channels
        .iter()
        .map(|c| (c.id.clone(), c.name.clone()))
        .collect();
    let since = Utc::now() - Duration::hours(state.config.insight_window_hours);
    let messages = state
        .store
        .messages_since(&channel_ids, since, state.config.insight_scan_limit)
        .await?;
    report.message_count = messages.len();
    report.scanned = report.message_count;

    let owner = caller
        .member
        .full_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "System".to_string());

    let drafts = extract(&messages, &channel_names, &RuleSet::default(), &state.mention);
    let mut failed_messages = HashSet::new();
    for draft in drafts {
        let key = draft.key();
        if failed_messages.contains(&key.source_message_id) {
            continue;
        }
        let insight = draft.into_insight(organization_id, &owner);
        match state.store.insert_insight(&insight, Some(&key)).await {
            Ok(true) => report.created += 1,
            Ok(false) => {}
            Err(err) => {
                error!(
                    message_id = %key.source_message_id,
                    category = key.category.as_str(),
                    error = %err,
                    "failed to store insight, skipping message"
                );
                failed_messages.insert(key.source_message_id);
            }
        }
    }

    info!(
        organization_id,
        created = report.created,
        scanned = report.scanned,
        channels = report.channel_count,
        messages = report.message_count,
        "insight generation finished"
    );
    Ok(report)
}

/// Read-time visibility: keep insights with at least one source in a current team channel.
pub fn visible(insights: Vec<Insight>, team_channel_ids: &HashSet<String>) -> Vec<Insight> {
    insights
        .into_iter()
        .filter(|insight| {
            insight.sources.iter().any(|source| {
                source
                    .channel
                    .as_ref()
                    .is_some_and(|channel| team_channel_ids.contains(channel))
            })
        })
        .collect()
}

fn parse_filter(query: &InsightsQuery) -> Result<InsightFilter, ApiError> {
    let insight_type = match query.insight_type.as_deref().filter(|v| !v.is_empty()) {
        Some(raw) => Some(InsightType::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid type"))?),
        None => None,
    };
    let impact = match query.impact.as_deref().filter(|v| !v.is_empty()) {
        Some(raw) => Some(Impact::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid impact"))?),
        None => None,
    };
    Ok(InsightFilter {
        insight_type,
        impact,
    })
}

pub async fn list(
    state: &AppState,
    caller: &Caller,
    query: &InsightsQuery,
) -> Result<Vec<Insight>, ApiError> {
    let filter = parse_filter(query)?;
    let team_channel_ids: HashSet<String> = state
        .store
        .channels(&caller.organization_id)
        .await?
        .into_iter()
        .filter(|c| c.channel_type == ChannelType::Team)
        .map(|c| c.id)
        .collect();
    let insights = state
        .store
        .insights(&caller.organization_id, &filter)
        .await?;
    Ok(visible(insights, &team_channel_ids))
}

fn clip(value: Option<&Value>, max: usize) -> String {
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    text.chars().take(max).collect()
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Validates and normalizes a directly authored insight.
pub fn validate_authored(
    body: CreateInsightBody,
    organization_id: &str,
    owner: &str,
) -> Result<Insight, ApiError> {
    let insight_type =
        InsightType::parse(&body.insight_type).ok_or_else(|| ApiError::bad_request("Invalid type"))?;
    let impact = Impact::parse(&body.impact).ok_or_else(|| ApiError::bad_request("Invalid impact"))?;
    let title = body.title.trim().to_string();
    let summary = body.summary.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title required"));
    }
    if summary.is_empty() {
        return Err(ApiError::bad_request("Summary required"));
    }
    let confidence = body.confidence.unwrap_or(0.7);
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ApiError::bad_request("Confidence must be 0..1"));
    }
    if title.chars().count() > 300 || summary.chars().count() > 6000 {
        return Err(ApiError::bad_request("Content too long"));
    }
    if body.sources.len() > 5 {
        return Err(ApiError::bad_request("Too many sources"));
    }

    let sources = body
        .sources
        .iter()
        .filter_map(Value::as_object)
        .map(|source| InsightSource {
            label: clip(source.get("label"), 120),
            url: clip(source.get("url"), 500),
            timestamp: clip(source.get("timestamp"), usize::MAX),
            channel: optional_string(source.get("channel")),
            message_id: optional_string(source.get("messageId"))
                .or_else(|| optional_string(source.get("message_id"))),
        })
        .collect();

    let suggested_actions = body
        .suggested_actions
        .iter()
        .enumerate()
        .filter_map(|(idx, action)| action.as_object().map(|action| (idx, action)))
        .map(|(idx, action)| SuggestedAction {
            id: optional_string(action.get("id")).unwrap_or_else(|| format!("action-{idx}")),
            label: clip(action.get("label"), 140),
            intent: match action.get("intent").and_then(Value::as_str) {
                Some("primary") => ActionIntent::Primary,
                Some("ghost") => ActionIntent::Ghost,
                _ => ActionIntent::Secondary,
            },
        })
        .collect();

    Ok(Insight {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.to_string(),
        insight_type,
        title,
        summary,
        confidence,
        impact,
        owner: owner.to_string(),
        sources,
        suggested_actions,
        user_role: body.user_role.filter(|role| !role.trim().is_empty()),
        created_at: Utc::now(),
    })
}

pub async fn author(
    state: &AppState,
    caller: &Caller,
    body: CreateInsightBody,
) -> Result<Insight, ApiError> {
    let owner = caller
        .member
        .full_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "System".to_string());
    let insight = validate_authored(body, &caller.organization_id, &owner)?;
    state.store.insert_insight(&insight, None).await?;
    info!(insight_id = %insight.id, kind = insight.insight_type.as_str(), "insight authored");
    Ok(insight)
}
