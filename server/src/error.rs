use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm::ModelError;
use crate::store::StoreError;

/// Errors surfaced by HTTP handlers. Each variant maps to one stable error code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("user not in an organization")]
    NoOrganization,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("language model error: {0}")]
    Gemini(String),

    #[error("{0}")]
    ServerConfig(String),

    #[error("internal error: {0}")]
    Server(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NoOrganization => "NO_ORGANIZATION",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Fetch(_) => "FETCH_ERROR",
            ApiError::Insert(_) => "INSERT_ERROR",
            ApiError::Gemini(_) => "GEMINI_ERROR",
            ApiError::ServerConfig(_) => "SERVER_CONFIG",
            ApiError::Server(_) => "SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NoOrganization | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Fetch(_)
            | ApiError::Insert(_)
            | ApiError::Gemini(_)
            | ApiError::ServerConfig(_)
            | ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the caller. Storage and provider details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Fetch(_) => "Failed to fetch data".to_string(),
            ApiError::Insert(_) => "Failed to save data".to_string(),
            ApiError::Gemini(_) => "Failed to process AI request".to_string(),
            ApiError::Server(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Fetch(_) | ApiError::Insert(_) | ApiError::Gemini(_) | ApiError::Server(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Fetch(detail) => ApiError::Fetch(detail),
            StoreError::Insert(detail) | StoreError::Conflict(detail) => ApiError::Insert(detail),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotConfigured => {
                ApiError::ServerConfig("Gemini API key not configured".to_string())
            }
            other => ApiError::Gemini(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_details_are_not_exposed() {
        let err = ApiError::from(StoreError::Insert("duplicate key on messages_pkey".into()));
        assert_eq!(err.code(), "INSERT_ERROR");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("messages_pkey"));
    }

    #[test]
    fn validation_errors_are_verbatim() {
        let err = ApiError::bad_request("channelId and content are required");
        assert_eq!(err.code(), "BAD_REQUEST");
        assert_eq!(err.public_message(), "channelId and content are required");
    }

    #[test]
    fn missing_model_key_is_a_config_error() {
        let err = ApiError::from(ModelError::NotConfigured);
        assert_eq!(err.code(), "SERVER_CONFIG");
    }
}
