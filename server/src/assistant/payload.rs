use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCard {
    pub title: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

/// Renderable form of an assistant reply. Anything that is not a well-formed
/// structured reply degrades to `PlainText`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantPayload {
    #[serde(rename = "text")]
    PlainText { content: String },
    #[serde(rename = "insight")]
    StructuredInsight { content: String, data: InsightCard },
}

impl AssistantPayload {
    pub fn plain(text: impl Into<String>) -> Self {
        AssistantPayload::PlainText {
            content: text.into(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        for candidate in json_candidates(trimmed) {
            let Ok(parsed) = serde_json::from_str::<Value>(&candidate) else {
                continue;
            };
            if let Some(payload) = from_value(&parsed) {
                return payload;
            }
        }
        AssistantPayload::plain(trimmed)
    }
}

fn json_candidates(trimmed: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if trimmed.is_empty() {
        return candidates;
    }
    candidates.push(trimmed.to_string());

    if trimmed.starts_with("```") {
        let stripped = trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string();
        if !stripped.is_empty() {
            candidates.push(stripped);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            candidates.push(trimmed[start..=end].to_string());
        }
    }
    candidates
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn from_value(parsed: &Value) -> Option<AssistantPayload> {
    let kind = parsed.get("type").and_then(Value::as_str)?;
    let content = non_empty_str(parsed.get("content"))?;
    match kind {
        "text" => Some(AssistantPayload::PlainText { content }),
        "insight" => {
            let card = parsed.get("data").and_then(|data| {
                Some(InsightCard {
                    title: non_empty_str(data.get("title"))?,
                    value: non_empty_str(data.get("value"))?,
                    change: non_empty_str(data.get("change")),
                    trend: data
                        .get("trend")
                        .cloned()
                        .and_then(|trend| serde_json::from_value::<Trend>(trend).ok()),
                })
            });
            Some(match card {
                Some(data) => AssistantPayload::StructuredInsight { content, data },
                None => AssistantPayload::PlainText { content },
            })
        }
        _ => None,
    }
}
