//! Mention-triggered assistant replies.
//!
//! One invocation walks `Idle -> Detecting -> Mentioned -> BuildingContext ->
//! Calling -> Succeeded | Failed` and always persists exactly one assistant
//! message once it reaches `Calling`. Provider failures never surface as
//! request errors: the local responder answers instead and the outcome carries
//! `ai_error` so clients can offer a retry.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::auth::Caller;
use crate::channels::{self, NewMessage};
use crate::error::ApiError;
use crate::llm::{generate_with_timeout, ModelError, Usage};
use crate::prompting::{
    grounding_block, render_assistant_prompt, render_system_prompt, PromptInput, PromptTurn,
    Speaker, SystemPromptContext,
};
use crate::store::{Cursor, MessageQuery};
use crate::types::{Channel, ChatBody, ChatRole, ContextItem, Message};

pub mod fallback;
pub mod payload;

pub use payload::AssistantPayload;

pub const AI_FALLBACK_ERROR: &str = "Native request failed. Using fallback, retry?";
const DEBUG_PHRASE: &str = "debug context";
const EMPTY_REPLY: &str = "I apologize, but I couldn't generate a response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Detecting,
    NoMention,
    Mentioned,
    BuildingContext,
    Calling,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantOutcome {
    pub message: Message,
    pub payload: AssistantPayload,
    pub ai_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub trace: Vec<Phase>,
}

#[derive(Debug, Default)]
struct Trace(Vec<Phase>);

impl Trace {
    fn enter(&mut self, phase: Phase, message_id: &str) {
        debug!(message_id, phase = ?phase, "assistant phase");
        self.0.push(phase);
    }
}

/// True when `message` should start an invocation. Assistant output never does.
pub fn should_invoke(state: &AppState, message: &Message) -> bool {
    !message.is_ai_response && state.mention.is_mentioned(&message.content)
}

/// Runs detection for a freshly stored user message and, when it mentions the
/// assistant, the full invocation.
pub async fn on_user_message(
    state: &AppState,
    organization_id: &str,
    message: &Message,
    channel: &Channel,
) -> Result<Option<AssistantOutcome>, ApiError> {
    let mut trace = Trace::default();
    trace.enter(Phase::Idle, &message.id);
    trace.enter(Phase::Detecting, &message.id);
    if !should_invoke(state, message) {
        trace.enter(Phase::NoMention, &message.id);
        trace.enter(Phase::Idle, &message.id);
        return Ok(None);
    }
    trace.enter(Phase::Mentioned, &message.id);
    run(state, organization_id, message, channel, trace).await.map(Some)
}

/// Explicit retry of the invocation for `message_id`. Always calls the provider again.
pub async fn retry(
    state: &AppState,
    caller: &Caller,
    message_id: &str,
) -> Result<AssistantOutcome, ApiError> {
    let message = state
        .store
        .message(message_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    let channel = channels::owned_channel(state, &caller.organization_id, &message.channel_id)
        .await
        .map_err(|_| ApiError::not_found("Message not found"))?;

    let mut trace = Trace::default();
    trace.enter(Phase::Idle, &message.id);
    trace.enter(Phase::Detecting, &message.id);
    if !should_invoke(state, &message) {
        return Err(ApiError::bad_request(format!(
            "Message does not mention @{}",
            state.mention.handle()
        )));
    }
    trace.enter(Phase::Mentioned, &message.id);
    info!(message_id = %message.id, "assistant retry requested");
    run(state, &caller.organization_id, &message, &channel, trace).await
}

async fn run(
    state: &AppState,
    organization_id: &str,
    trigger: &Message,
    channel: &Channel,
    mut trace: Trace,
) -> Result<AssistantOutcome, ApiError> {
    trace.enter(Phase::BuildingContext, &trigger.id);
    let prompt = build_prompt(state, organization_id, trigger, channel).await;

    trace.enter(Phase::Calling, &trigger.id);
    let result = if state.model.is_configured() {
        generate_with_timeout(state.model.as_ref(), &prompt, state.config.ai_timeout).await
    } else {
        Err(ModelError::NotConfigured)
    };

    let (content, payload, ai_error, usage) = match result {
        Ok(completion) => {
            trace.enter(Phase::Succeeded, &trigger.id);
            let payload = AssistantPayload::parse(&completion.text);
            (completion.text, payload, None, completion.usage)
        }
        Err(err) => {
            trace.enter(Phase::Failed, &trigger.id);
            warn!(message_id = %trigger.id, error = %err, "assistant call failed, using fallback");
            let content = fallback::fallback_content(&trigger.content);
            let payload = AssistantPayload::plain(content.clone());
            (content, payload, Some(AI_FALLBACK_ERROR.to_string()), None)
        }
    };

    let used_fallback = ai_error.is_some();
    let (message, _) = channels::create_message(
        state,
        organization_id,
        NewMessage::from_assistant(&channel.id, &content, used_fallback),
    )
    .await?;

    Ok(AssistantOutcome {
        message,
        payload,
        ai_error,
        usage,
        trace: trace.0,
    })
}

async fn load_grounding(state: &AppState, organization_id: &str) -> Vec<ContextItem> {
    match state
        .store
        .contexts(organization_id, state.config.grounding_limit)
        .await
    {
        Ok(items) => items,
        Err(err) => {
            warn!(organization_id, error = %err, "context fetch failed, continuing without grounding");
            Vec::new()
        }
    }
}

async fn system_prompt(state: &AppState, organization_id: &str) -> String {
    let organization_name = match state.store.organization(organization_id).await {
        Ok(Some(organization)) => organization.name,
        _ => String::new(),
    };
    render_system_prompt(&SystemPromptContext {
        assistant_name: &state.config.assistant_name,
        organization_name: &organization_name,
    })
}

/// The last `history_limit` messages strictly before `trigger`, as prompt turns.
async fn history_before(state: &AppState, trigger: &Message) -> Vec<PromptTurn> {
    let query = MessageQuery::before(Cursor::from(trigger), state.config.history_limit);
    let earlier = match state.store.messages(&trigger.channel_id, &query).await {
        Ok(messages) => messages,
        Err(err) => {
            warn!(channel_id = %trigger.channel_id, error = %err, "history fetch failed");
            return Vec::new();
        }
    };
    earlier
        .into_iter()
        .map(|m| PromptTurn {
            speaker: if m.is_ai_response {
                Speaker::Model
            } else {
                Speaker::User
            },
            content: m.content,
        })
        .collect()
}

/// Assembles the full prompt. Each lookup degrades to an empty section on failure.
pub async fn build_prompt(
    state: &AppState,
    organization_id: &str,
    trigger: &Message,
    channel: &Channel,
) -> String {
    let grounding = load_grounding(state, organization_id).await;
    let history = history_before(state, trigger).await;
    let system = system_prompt(state, organization_id).await;
    debug!(
        channel_id = %channel.id,
        grounding = grounding.len(),
        history = history.len(),
        "assistant context built"
    );
    render_assistant_prompt(&PromptInput {
        system: &system,
        grounding: &grounding,
        history: &history,
        message: &trigger.content,
    })
}

/// Stateless chat used by the assistant panel. Provider errors are returned to
/// the caller here, since nothing is persisted.
pub async fn chat(state: &AppState, caller: &Caller, body: ChatBody) -> Result<Value, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }
    if !state.model.is_configured() {
        return Err(ModelError::NotConfigured.into());
    }

    let grounding = load_grounding(state, &caller.organization_id).await;

    if message.to_lowercase().contains(DEBUG_PHRASE) {
        info!(organization_id = %caller.organization_id, "debug context requested");
        let block = grounding_block(&grounding);
        let block = if block.is_empty() {
            "No context found".to_string()
        } else {
            block
        };
        return Ok(json!({
            "message": format!(
                "### Debug Context Output\n\n**Organization ID:** `{}`\n**Items Found:** {}\n\n**Context Block:**\n```text\n{}\n```\n\n**User Info:**\nID: {}\nName: {}",
                caller.organization_id,
                grounding.len(),
                block,
                caller.member.id,
                caller.member.display_name(),
            ),
            "usage": Usage::default(),
        }));
    }

    let system = match body.system_prompt.as_deref().map(str::trim) {
        Some(custom) if !custom.is_empty() => custom.to_string(),
        _ => system_prompt(state, &caller.organization_id).await,
    };
    let history: Vec<PromptTurn> = body
        .history
        .iter()
        .filter(|turn| turn.role != ChatRole::System)
        .map(|turn| PromptTurn {
            speaker: if turn.role == ChatRole::Assistant {
                Speaker::Model
            } else {
                Speaker::User
            },
            content: turn.content.clone(),
        })
        .collect();

    let prompt = render_assistant_prompt(&PromptInput {
        system: &system,
        grounding: &grounding,
        history: &history,
        message,
    });

    match generate_with_timeout(state.model.as_ref(), &prompt, state.config.ai_timeout).await {
        Ok(completion) => Ok(json!({
            "message": completion.text,
            "usage": completion.usage.unwrap_or_default(),
        })),
        Err(ModelError::EmptyResponse) => Ok(json!({
            "message": EMPTY_REPLY,
            "usage": Usage::default(),
        })),
        Err(err) => Err(err.into()),
    }
}
