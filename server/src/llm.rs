//! Language-model provider boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("language model is not configured")]
    NotConfigured,

    #[error("language model timed out after {0}ms")]
    Timeout(u64),

    #[error("language model request failed: {0}")]
    Transport(String),

    #[error("language model returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("language model response had no text")]
    EmptyResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Single-turn generation over a fully rendered prompt.
    async fn generate(&self, prompt: &str) -> Result<Completion, ModelError>;
}

/// `generate` bounded by `limit`. An elapsed deadline is reported as `ModelError::Timeout`.
pub async fn generate_with_timeout(
    model: &dyn LanguageModel,
    prompt: &str,
    limit: Duration,
) -> Result<Completion, ModelError> {
    match tokio::time::timeout(limit, model.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(limit.as_millis() as u64)),
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

fn usage_from_payload(payload: &Value) -> Option<Usage> {
    let meta = payload.get("usageMetadata")?;
    let read = |key: &str| meta.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage {
        prompt_tokens: read("promptTokenCount"),
        completion_tokens: read("candidatesTokenCount"),
        total_tokens: read("totalTokenCount"),
    })
}

fn text_from_payload(payload: &Value) -> String {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<Completion, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::NotConfigured)?;
        let response = self
            .http
            .post(format!("{}/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", api_key)
            .json(&json!({
                "contents": [
                    { "parts": [ { "text": prompt } ] }
                ]
            }))
            .send()
            .await
            .map_err(|err| ModelError::Transport(err.without_url().to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| {
                ModelError::Transport(format!("invalid response body: {}", err.without_url()))
            })?;
        let text = text_from_payload(&payload);
        if text.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(Completion {
            text,
            usage: usage_from_payload(&payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text_and_usage() {
        let payload = json!({
            "candidates": [
                { "content": { "parts": [ { "text": "  Revenue is up.  " } ] } },
                { "content": { "parts": [ { "text": "ignored" } ] } }
            ],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 4,
                "totalTokenCount": 16
            }
        });
        assert_eq!(text_from_payload(&payload), "Revenue is up.");
        assert_eq!(
            usage_from_payload(&payload),
            Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 4,
                total_tokens: 16
            })
        );
    }

    #[test]
    fn missing_candidates_yield_empty_text() {
        assert_eq!(text_from_payload(&json!({ "promptFeedback": {} })), "");
        assert_eq!(usage_from_payload(&json!({})), None);
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_to_call() {
        let client = GeminiClient::new(reqwest::Client::new(), Some("  ".into()), "gemini-2.5-flash");
        assert!(!client.is_configured());
        assert!(matches!(
            client.generate("hi").await,
            Err(ModelError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn transport_errors_do_not_carry_the_key() {
        let client = GeminiClient::new(
            reqwest::Client::new(),
            Some("SECRET-KEY-123".into()),
            "gemini-2.5-flash",
        )
        .with_base_url("http://127.0.0.1:9/");
        let err = client.generate("hi").await.unwrap_err();
        assert!(matches!(err, ModelError::Transport(_)));
        assert!(!err.to_string().contains("SECRET-KEY-123"));
        assert!(!crate::error::ApiError::from(err)
            .to_string()
            .contains("SECRET-KEY-123"));
    }
}
