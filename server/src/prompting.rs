use minijinja::{context, Environment};

use crate::types::ContextItem;

const ASSISTANT_SYSTEM_TEMPLATE: &str = include_str!("prompts/assistant_system.j2");
const ASSISTANT_PROMPT_TEMPLATE: &str = include_str!("prompts/assistant_prompt.j2");

pub struct SystemPromptContext<'a> {
    pub assistant_name: &'a str,
    pub organization_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    fn label(&self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Model => "Model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptTurn {
    pub speaker: Speaker,
    pub content: String,
}

pub struct PromptInput<'a> {
    pub system: &'a str,
    pub grounding: &'a [ContextItem],
    pub history: &'a [PromptTurn],
    pub message: &'a str,
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("assistant_system", ASSISTANT_SYSTEM_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("assistant_system") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            assistant_name => display_or(ctx.assistant_name, "Native"),
            organization_name => display_or(ctx.organization_name, "team"),
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value.trim()
    }
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    format!(
        "You are {}, the AI assistant for the {} workspace.\n\
         Treat the Organization Knowledge Base as the source of truth and keep answers concise.\n\
         Return only a raw JSON object: \
         {{\"type\": \"text\" | \"insight\", \"content\": \"...\", \
         \"data\": {{\"title\", \"value\", \"change\", \"trend\"}}}}.\n",
        display_or(ctx.assistant_name, "Native"),
        display_or(ctx.organization_name, "team"),
    )
}

/// `Item:`/`Value:` records separated by `---`, tags appended when present.
pub fn grounding_block(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            let tags = if item.tags.is_empty() {
                String::new()
            } else {
                format!(" [Tags: {}]", item.tags.join(", "))
            };
            format!("Item: {}\nValue: {}{}", item.title, item.content, tags)
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub fn history_block(turns: &[PromptTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.speaker.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_assistant_prompt(input: &PromptInput<'_>) -> String {
    let grounding = grounding_block(input.grounding);
    let history = history_block(input.history);

    let mut env = Environment::new();
    if env
        .add_template("assistant_prompt", ASSISTANT_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_assistant_prompt(input.system, &grounding, &history, input.message);
    }
    let Ok(template) = env.get_template("assistant_prompt") else {
        return fallback_assistant_prompt(input.system, &grounding, &history, input.message);
    };

    template
        .render(context! {
            system => input.system.trim_end(),
            grounding => grounding,
            history => history,
            message => input.message,
        })
        .unwrap_or_else(|_| {
            fallback_assistant_prompt(input.system, &grounding, &history, input.message)
        })
}

fn fallback_assistant_prompt(system: &str, grounding: &str, history: &str, message: &str) -> String {
    let mut prompt = format!("{}\n\n", system.trim_end());
    if !grounding.is_empty() {
        prompt.push_str("Organization Knowledge Base (Strict Source of Truth):\n");
        prompt.push_str(grounding);
        prompt.push_str("\n\n");
    }
    if !history.is_empty() {
        prompt.push_str("Previous conversation:\n");
        prompt.push_str(history);
        prompt.push_str("\n\n");
    }
    prompt.push_str("User: ");
    prompt.push_str(message);
    prompt.push_str("\n\nModel:");
    prompt
}
