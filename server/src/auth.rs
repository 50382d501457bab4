use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::store::Store;
use crate::types::Member;

/// An authenticated member bound to their organization.
#[derive(Debug, Clone)]
pub struct Caller {
    pub member: Member,
    pub organization_id: String,
}

impl Caller {
    pub fn user_id(&self) -> &str {
        &self.member.id
    }

    pub fn require_manager(&self) -> Result<(), ApiError> {
        if self.member.role.can_manage() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only owners and admins can perform this action"))
        }
    }
}

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub async fn authenticate_token(store: &dyn Store, token: &str) -> Result<Caller, ApiError> {
    let member = store
        .member_for_token(&sha256_hex(token))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    let organization_id = member
        .organization_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::NoOrganization)?;
    Ok(Caller {
        member,
        organization_id,
    })
}

pub async fn authenticate(store: &dyn Store, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    authenticate_token(store, &token).await
}
