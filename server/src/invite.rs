//! Organization invites delivered by SMTP.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use minijinja::{context, Environment};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::config::SmtpConfig;
use crate::error::ApiError;
use crate::policy;
use crate::types::{Invite, InviteBody, Role};

const INVITE_EMAIL_TEMPLATE: &str = include_str!("templates/invite_email.html");
pub const MAX_INVITES_PER_REQUEST: usize = 5;
pub const INVITE_TTL_DAYS: i64 = 7;
pub const RATE_LIMIT_MESSAGE: &str = "Invite already sent in the last 24 hours";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("email delivery is not configured")]
    NotConfigured,

    #[error("invalid address: {0}")]
    Address(String),

    #[error("smtp error: {0}")]
    Transport(String),
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::NotConfigured => ApiError::ServerConfig(err.to_string()),
            MailError::Address(detail) => ApiError::BadRequest(detail),
            MailError::Transport(detail) => ApiError::Server(detail),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: String) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Implicit TLS on port 465, STARTTLS on any other port.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|err| MailError::Transport(err.to_string()))?;
        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.password.clone()))
            .build();
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|err| MailError::Address(format!("SMTP_FROM: {err}")))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: String) -> Result<(), MailError> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|err| MailError::Address(format!("{to}: {err}")))?;
        let email = Email::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|err| MailError::Transport(err.to_string()))?;
        self.transport
            .send(email)
            .await
            .map_err(|err| MailError::Transport(err.to_string()))?;
        Ok(())
    }
}

pub fn render_invite_email(organization_name: &str, product_name: &str, base_url: &str, invite_link: &str) -> String {
    let mut env = Environment::new();
    let rendered = env
        .add_template("invite_email.html", INVITE_EMAIL_TEMPLATE)
        .ok()
        .and_then(|_| env.get_template("invite_email.html").ok())
        .and_then(|template| {
            template
                .render(context! {
                    organization_name => organization_name,
                    product_name => product_name,
                    logo_url => format!("{base_url}/NativeLogo.png"),
                    invite_link => invite_link,
                    expires_in_days => INVITE_TTL_DAYS,
                })
                .ok()
        });
    rendered.unwrap_or_else(|| {
        format!(
            "<p>You've been invited to join {product_name}.</p><p><a href=\"{invite_link}\">Accept invite</a></p>"
        )
    })
}

/// Lower-cased, trimmed, de-duplicated, at most five addresses.
pub fn normalize_emails(body: &InviteBody) -> Vec<String> {
    let raw: Vec<String> = match (&body.emails, &body.email) {
        (Some(emails), _) => emails.clone(),
        (None, Some(email)) => vec![email.clone()],
        (None, None) => Vec::new(),
    };
    let mut emails: Vec<String> = Vec::new();
    for email in raw {
        let email = email.trim().to_lowercase();
        if !email.is_empty() && !emails.contains(&email) {
            emails.push(email);
        }
    }
    emails.truncate(MAX_INVITES_PER_REQUEST);
    emails
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResult {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteReport {
    pub sent: usize,
    pub failed: Vec<InviteResult>,
    pub results: Vec<InviteResult>,
}

impl InviteReport {
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.failed.len() == self.results.len()
    }
}

pub async fn send_invites(
    state: &AppState,
    caller: &Caller,
    body: InviteBody,
) -> Result<InviteReport, ApiError> {
    let emails = normalize_emails(&body);
    if body.organization_id.trim().is_empty() || emails.is_empty() {
        return Err(ApiError::bad_request(
            "Emails (<=5) and organization ID are required",
        ));
    }
    if body.organization_id != caller.organization_id {
        return Err(ApiError::forbidden("Not a member of this organization"));
    }
    policy::authorize(caller, "members.invite")?;
    let role = match body.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Role::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid role"))?,
        None => Role::Member,
    };
    if role == Role::Owner && caller.member.role != Role::Owner {
        return Err(ApiError::forbidden("Only owners can invite owners"));
    }

    let organization_name = state
        .store
        .organization(&caller.organization_id)
        .await?
        .map(|org| org.name)
        .unwrap_or_else(|| "the team".to_string());
    let base_url = state.config.app_base_url.as_str();
    let subject = format!("You're invited to {}", state.config.assistant_name);

    let mut results = Vec::with_capacity(emails.len());
    for email in emails {
        let since = Utc::now() - Duration::hours(24);
        if state
            .store
            .invite_sent_since(&caller.organization_id, &email, since)
            .await?
        {
            results.push(InviteResult {
                email,
                invite_link: None,
                error: Some(RATE_LIMIT_MESSAGE.to_string()),
            });
            continue;
        }

        let now = Utc::now();
        let invite = Invite {
            id: Uuid::new_v4().to_string(),
            organization_id: caller.organization_id.clone(),
            email: email.clone(),
            invite_code: Uuid::new_v4().to_string(),
            invited_by: caller.member.id.clone(),
            role,
            created_at: now,
            expires_at: now + Duration::days(INVITE_TTL_DAYS),
            emailed_at: None,
        };
        if let Err(err) = state.store.insert_invite(&invite).await {
            error!(email = %email, error = %err, "failed to store invite");
            results.push(InviteResult {
                email,
                invite_link: None,
                error: Some("Failed to create invite".to_string()),
            });
            continue;
        }

        let link = format!("{base_url}/signup?invite={}", invite.invite_code);
        let delivery = match state.mailer.as_ref() {
            Some(mailer) => {
                let html = render_invite_email(
                    &organization_name,
                    &state.config.assistant_name,
                    base_url,
                    &link,
                );
                mailer.send_html(&email, &subject, html).await
            }
            None => Err(MailError::NotConfigured),
        };
        let error = match delivery {
            Ok(()) => {
                info!(email = %email, organization_id = %caller.organization_id, "invite sent");
                if let Err(err) = state.store.mark_invite_emailed(&invite.id, Utc::now()).await {
                    error!(invite_id = %invite.id, error = %err, "failed to record invite delivery");
                }
                None
            }
            Err(err) => {
                warn!(email = %email, error = %err, "invite email not delivered");
                Some(match err {
                    MailError::NotConfigured => "Email delivery is not configured".to_string(),
                    _ => "Failed to send invite email".to_string(),
                })
            }
        };
        results.push(InviteResult {
            email,
            invite_link: Some(link),
            error,
        });
    }

    let failed: Vec<InviteResult> = results.iter().filter(|r| r.error.is_some()).cloned().collect();
    Ok(InviteReport {
        sent: results.len() - failed.len(),
        failed,
        results,
    })
}
