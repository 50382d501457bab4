#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use workspace_server::app::{router, AppState};
use workspace_server::config::Config;
use workspace_server::invite::{MailError, Mailer};
use workspace_server::llm::{Completion, LanguageModel, ModelError, Usage};
use workspace_server::notify::push::{PushError, PushSender};
use workspace_server::store::memory::MemoryStore;
use workspace_server::types::{Member, Organization, PushSubscriptionPayload, Role};

pub const ACME: &str = "acme";
pub const GLOBEX: &str = "globex";
pub const ALICE: &str = "alice-token";
pub const BOB: &str = "bob-token";
pub const CAROL: &str = "carol-token";
pub const MALLORY: &str = "mallory-token";

/// Language model that replays scripted replies and records every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    configured: bool,
    delay: Option<Duration>,
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn configured() -> Self {
        Self {
            configured: true,
            ..Self::default()
        }
    }

    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            configured: true,
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, err: ModelError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, prompt: &str) -> Result<Completion, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Here is what I found.".to_string()));
        next.map(|text| Completion {
            text,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

/// Push sender that records deliveries and fails on selected endpoints.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
    gone: Mutex<HashSet<String>>,
}

impl RecordingPush {
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn expire_endpoint(&self, endpoint: &str) {
        self.gone.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(
        &self,
        subscription: &PushSubscriptionPayload,
        payload: &[u8],
    ) -> Result<(), PushError> {
        if self.gone.lock().unwrap().contains(&subscription.endpoint) {
            return Err(PushError::Gone);
        }
        if self.failing.lock().unwrap().contains(&subscription.endpoint) {
            return Err(PushError::Delivery("connection reset".to_string()));
        }
        let body: Value = serde_json::from_slice(payload).unwrap();
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), body));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_html(&self, to: &str, subject: &str, _html: String) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub model: Arc<ScriptedModel>,
    pub push: Option<Arc<RecordingPush>>,
    pub mailer: Option<Arc<RecordingMailer>>,
    pub state: Arc<AppState>,
    pub router: Router,
}

pub struct Builder {
    config: Config,
    model: ScriptedModel,
    push: bool,
    mailer: bool,
}

impl Builder {
    pub fn model(mut self, model: ScriptedModel) -> Self {
        self.model = model;
        self
    }

    pub fn ai_timeout(mut self, timeout: Duration) -> Self {
        self.config.ai_timeout = timeout;
        self
    }

    pub fn with_push(mut self) -> Self {
        self.push = true;
        self
    }

    pub fn with_mailer(mut self) -> Self {
        self.mailer = true;
        self
    }

    pub fn build(self) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let model = Arc::new(self.model);
        let mut state = AppState::new(self.config, store.clone(), model.clone()).unwrap();
        let push = self.push.then(|| Arc::new(RecordingPush::default()));
        if let Some(push) = push.clone() {
            state = state.with_push(push);
        }
        let mailer = self.mailer.then(|| Arc::new(RecordingMailer::default()));
        if let Some(mailer) = mailer.clone() {
            state = state.with_mailer(mailer);
        }
        let state = Arc::new(state);
        TestApp {
            store,
            model,
            push,
            mailer,
            router: router(state.clone()),
            state,
        }
    }
}

pub fn app() -> Builder {
    Builder {
        config: Config::default(),
        model: ScriptedModel::configured(),
        push: false,
        mailer: false,
    }
}

fn member(id: &str, organization_id: &str, name: &str, role: Role) -> Member {
    Member {
        id: id.to_string(),
        organization_id: Some(organization_id.to_string()),
        full_name: Some(name.to_string()),
        email: format!("{id}@{organization_id}.test"),
        role,
    }
}

fn seed(store: &MemoryStore) {
    for (id, name) in [(ACME, "Acme"), (GLOBEX, "Globex")] {
        store.insert_organization(Organization {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        });
    }
    store.insert_member(member("alice", ACME, "Alice Liddell", Role::Owner));
    store.insert_member(member("bob", ACME, "Bob Stone", Role::Member));
    store.insert_member(member("carol", ACME, "Carol Danvers", Role::Admin));
    store.insert_member(member("mallory", GLOBEX, "Mallory Knox", Role::Owner));
    store.insert_token(ALICE, "alice");
    store.insert_token(BOB, "bob");
    store.insert_token(CAROL, "carol");
    store.insert_token(MALLORY, "mallory");
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), Some(body)).await
    }

    /// Lists channels as `token` and returns the id of the first one named `name`.
    pub async fn channel_id(&self, token: &str, name: &str) -> String {
        let (status, body) = self.get("/api/channels", token).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["channels"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .and_then(|c| c["id"].as_str())
            .unwrap_or_else(|| panic!("no channel named {name}"))
            .to_string()
    }

    pub async fn send(&self, token: &str, channel_id: &str, content: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/messages",
                token,
                serde_json::json!({ "channelId": channel_id, "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    pub async fn messages(&self, token: &str, channel_id: &str) -> Vec<Value> {
        let (status, body) = self
            .get(&format!("/api/channels/{channel_id}/messages?limit=200"), token)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["messages"].as_array().unwrap().clone()
    }
}

pub fn subscription(endpoint: &str) -> Value {
    serde_json::json!({
        "subscription": {
            "endpoint": endpoint,
            "keys": { "p256dh": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM", "auth": "tBHItJI5svbpez7KI4CCXg" }
        }
    })
}
