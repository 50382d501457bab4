//! Organization-authored grounding records.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::types::{ContextItem, CreateContextBody};

pub const LIST_LIMIT: usize = 50;
const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 6000;
const MAX_TAGS: usize = 10;
const MAX_TAG_LEN: usize = 40;

pub fn validate(
    body: CreateContextBody,
    organization_id: &str,
    author_id: &str,
) -> Result<ContextItem, ApiError> {
    let title = body.title.trim();
    let content = body.content.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if content.is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::bad_request("Title too long"));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ApiError::bad_request("Content too long"));
    }
    if body.tags.len() > MAX_TAGS {
        return Err(ApiError::bad_request("Too many tags"));
    }
    if body.tags.iter().any(|tag| tag.chars().count() > MAX_TAG_LEN) {
        return Err(ApiError::bad_request("Invalid tags"));
    }

    Ok(ContextItem {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        tags: body.tags,
        updated_by: Some(author_id.to_string()),
        updated_at: Utc::now(),
    })
}

pub async fn list(state: &AppState, caller: &Caller) -> Result<Vec<ContextItem>, ApiError> {
    Ok(state
        .store
        .contexts(&caller.organization_id, LIST_LIMIT)
        .await?)
}

pub async fn create(
    state: &AppState,
    caller: &Caller,
    body: CreateContextBody,
) -> Result<ContextItem, ApiError> {
    let item = validate(body, &caller.organization_id, caller.user_id())?;
    state.store.insert_context(&item).await?;
    info!(context_id = %item.id, organization_id = %item.organization_id, "context saved");
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(title: &str, content: &str, tags: &[&str]) -> CreateContextBody {
        CreateContextBody {
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn message(result: Result<ContextItem, ApiError>) -> String {
        match result {
            Err(ApiError::BadRequest(message)) => message,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn trims_and_stamps_author() {
        let item = validate(body("  Q3 goals ", " ship v2 ", &["okr"]), "org", "u1").unwrap();
        assert_eq!(item.title, "Q3 goals");
        assert_eq!(item.content, "ship v2");
        assert_eq!(item.updated_by.as_deref(), Some("u1"));
        assert_eq!(item.organization_id, "org");
    }

    #[test]
    fn limits_are_enforced() {
        assert_eq!(message(validate(body("", "x", &[]), "org", "u")), "Title is required");
        assert_eq!(message(validate(body("t", " ", &[]), "org", "u")), "Content is required");
        assert_eq!(
            message(validate(body(&"t".repeat(201), "x", &[]), "org", "u")),
            "Title too long"
        );
        assert_eq!(
            message(validate(body("t", &"x".repeat(6001), &[]), "org", "u")),
            "Content too long"
        );
        let many: Vec<&str> = std::iter::repeat("a").take(11).collect();
        assert_eq!(message(validate(body("t", "x", &many), "org", "u")), "Too many tags");
        let long_tag = "a".repeat(41);
        assert_eq!(
            message(validate(body("t", "x", &[long_tag.as_str()]), "org", "u")),
            "Invalid tags"
        );
    }
}
