//! Role-based action policy shared by the gated endpoints and `/api/policy/check`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::types::{PolicyCheckBody, Role};

pub const ALLOW_POLICY: &str = "pol_allow_rbac";
pub const DENY_POLICY: &str = "pol_deny_rbac";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    pub policy_id: &'static str,
    pub rationale: String,
}

impl Decision {
    fn new(allow: bool, rationale: impl Into<String>) -> Self {
        Self {
            allow,
            policy_id: if allow { ALLOW_POLICY } else { DENY_POLICY },
            rationale: rationale.into(),
        }
    }
}

/// Unlisted actions are allowed for every member.
pub fn evaluate(role: Role, action: &str) -> Decision {
    let managing = role.can_manage();
    let role_name = role.as_str();
    match action {
        "tasks.delete" if managing => Decision::new(
            true,
            format!("User role '{role_name}' has permission to delete tasks"),
        ),
        "tasks.delete" => Decision::new(
            false,
            format!(
                "User role '{role_name}' does not have permission to delete tasks. Only owners and admins can delete."
            ),
        ),
        "tasks.create" | "tasks.update" => {
            Decision::new(true, "All organization members can create and update tasks")
        }
        "insights.create" | "insights.update" => {
            Decision::new(true, "All organization members can create and update insights")
        }
        "organization.update" if role == Role::Owner => {
            Decision::new(true, "User is organization owner")
        }
        "organization.update" => Decision::new(
            false,
            "Only organization owners can update organization settings",
        ),
        "members.invite" if managing => {
            Decision::new(true, format!("User role '{role_name}' can invite members"))
        }
        "members.invite" => Decision::new(false, "Only owners and admins can invite members"),
        _ => Decision::new(true, "Default policy allow for standard actions"),
    }
}

/// `Forbidden` carrying the rationale when the caller's role denies `action`.
pub fn authorize(caller: &Caller, action: &str) -> Result<(), ApiError> {
    let decision = evaluate(caller.member.role, action);
    if decision.allow {
        Ok(())
    } else {
        Err(ApiError::forbidden(decision.rationale))
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    #[serde(flatten)]
    pub decision: Decision,
    pub context: Map<String, Value>,
}

pub fn check(caller: &Caller, body: PolicyCheckBody) -> Result<CheckResponse, ApiError> {
    let resource_id = body.resource.as_ref().map(|r| r.id.trim()).unwrap_or("");
    if body.actor.trim().is_empty() || body.action.trim().is_empty() || resource_id.is_empty() {
        return Err(ApiError::bad_request(
            "actor, action, and resource are required",
        ));
    }
    let action = body.action.trim();
    let decision = evaluate(caller.member.role, action);
    let mut context = body.context;
    context.insert(
        "user_role".to_string(),
        Value::String(caller.member.role.as_str().to_string()),
    );
    context.insert("action".to_string(), Value::String(action.to_string()));
    Ok(CheckResponse { decision, context })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_and_invites_need_a_manager() {
        for action in ["tasks.delete", "members.invite"] {
            assert!(evaluate(Role::Owner, action).allow);
            assert!(evaluate(Role::Admin, action).allow);
            let denied = evaluate(Role::Member, action);
            assert!(!denied.allow);
            assert_eq!(denied.policy_id, DENY_POLICY);
        }
    }

    #[test]
    fn organization_settings_are_owner_only() {
        assert!(evaluate(Role::Owner, "organization.update").allow);
        assert!(!evaluate(Role::Admin, "organization.update").allow);
    }

    #[test]
    fn unknown_actions_default_to_allow() {
        let decision = evaluate(Role::Member, "channels.read");
        assert!(decision.allow);
        assert_eq!(decision.policy_id, ALLOW_POLICY);
        assert_eq!(decision.rationale, "Default policy allow for standard actions");
    }
}
