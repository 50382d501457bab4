mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::{app, ScriptedModel, ALICE, BOB};
use workspace_server::assistant::{fallback::FALLBACK_NOTICE, AI_FALLBACK_ERROR};
use workspace_server::channels::{self, NewMessage};
use workspace_server::llm::ModelError;

#[tokio::test]
async fn plain_messages_never_call_the_model() {
    let app = app().build();
    let channel = app.channel_id(ALICE, "ai-assistant").await;
    let body = app.send(ALICE, &channel, "email alice@native.io about it").await;
    assert!(body["assistant"].is_null());
    assert_eq!(app.model.calls(), 0);
    assert_eq!(app.messages(ALICE, &channel).await.len(), 1);
}

#[tokio::test]
async fn mention_produces_exactly_one_reply() {
    let app = app().build();
    app.model.reply("Revenue is up @native style");
    let channel = app.channel_id(ALICE, "ai-assistant").await;

    let body = app.send(ALICE, &channel, "@Native how is revenue?").await;
    assert_eq!(app.model.calls(), 1);
    assert_eq!(body["isAiResponse"], false);
    let reply = &body["assistant"]["message"];
    assert_eq!(reply["isAiResponse"], true);
    assert!(reply["authorId"].is_null());
    assert_eq!(reply["content"], "Revenue is up @native style");
    assert!(body["assistant"]["aiError"].is_null());
    assert_eq!(body["assistant"]["payload"]["type"], "text");

    let listed = app.messages(ALICE, &channel).await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1]["id"], reply["id"]);
    // The assistant's own text mentions the handle but must not re-trigger.
    assert_eq!(app.model.calls(), 1);
}

#[tokio::test]
async fn structured_replies_are_parsed() {
    let app = app().build();
    app.model.reply(
        r#"```json
{"type":"insight","content":"Revenue summary","data":{"title":"Revenue","value":"$125k","change":"+12%","trend":"up"}}
```"#,
    );
    let channel = app.channel_id(ALICE, "ai-assistant").await;
    let body = app.send(ALICE, &channel, "@native summarize revenue").await;
    let payload = &body["assistant"]["payload"];
    assert_eq!(payload["type"], "insight");
    assert_eq!(payload["data"]["trend"], "up");
}

#[tokio::test]
async fn timeout_falls_back_and_flags_the_reply() {
    let app = app()
        .model(ScriptedModel::slow(Duration::from_millis(500)))
        .ai_timeout(Duration::from_millis(20))
        .build();
    let channel = app.channel_id(ALICE, "ai-assistant").await;

    let body = app.send(ALICE, &channel, "@native what is our revenue?").await;
    let outcome = &body["assistant"];
    assert_eq!(outcome["aiError"], AI_FALLBACK_ERROR);
    let content = outcome["message"]["content"].as_str().unwrap();
    assert!(content.starts_with("Total revenue is $125,430"));
    assert!(content.ends_with(FALLBACK_NOTICE));
    assert_eq!(outcome["message"]["metadata"]["usedFallback"], true);
    assert_eq!(app.messages(ALICE, &channel).await.len(), 2);
}

#[tokio::test]
async fn provider_errors_and_missing_keys_fall_back() {
    let app = app().build();
    app.model.fail(ModelError::Status {
        status: 503,
        body: "overloaded".to_string(),
    });
    let channel = app.channel_id(ALICE, "ai-assistant").await;
    let body = app.send(ALICE, &channel, "@native anything new?").await;
    assert_eq!(body["assistant"]["aiError"], AI_FALLBACK_ERROR);
    assert!(body["assistant"]["message"]["content"]
        .as_str()
        .unwrap()
        .starts_with("Sorry, I don't have information regarding that."));

    let offline = common::app().model(ScriptedModel::unconfigured()).build();
    let channel = offline.channel_id(ALICE, "ai-assistant").await;
    let body = offline.send(ALICE, &channel, "@native hello").await;
    assert_eq!(body["assistant"]["aiError"], AI_FALLBACK_ERROR);
    assert_eq!(offline.model.calls(), 0);
}

#[tokio::test]
async fn retry_is_a_fresh_invocation() {
    let app = app().build();
    app.model.fail(ModelError::Transport("reset".to_string()));
    app.model.reply("Second time lucky");
    let channel = app.channel_id(ALICE, "ai-assistant").await;
    let body = app.send(ALICE, &channel, "@native status?").await;
    assert_eq!(body["assistant"]["aiError"], AI_FALLBACK_ERROR);

    let id = body["id"].as_str().unwrap();
    let (status, retried) = app
        .post(&format!("/api/messages/{id}/assistant"), ALICE, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{retried}");
    assert_eq!(retried["assistant"]["message"]["content"], "Second time lucky");
    assert!(retried["assistant"]["aiError"].is_null());
    assert_eq!(app.model.calls(), 2);
    assert_eq!(app.messages(ALICE, &channel).await.len(), 3);
}

#[tokio::test]
async fn retry_requires_a_mention_in_the_callers_tenant() {
    let app = app().build();
    let channel = app.channel_id(ALICE, "general").await;
    let body = app.send(ALICE, &channel, "no handle here").await;
    let id = body["id"].as_str().unwrap();

    let (status, body) = app
        .post(&format!("/api/messages/{id}/assistant"), BOB, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Message does not mention @native");

    let (status, _) = app
        .post(&format!("/api/messages/{id}/assistant"), common::MALLORY, json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/messages/unknown/assistant", ALICE, json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prompt_carries_grounding_and_prior_history_only() {
    let app = app().build();
    let (status, _) = app
        .post(
            "/api/contexts",
            ALICE,
            json!({ "title": "Launch date", "content": "Launch is March 3", "tags": ["launch"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let channel = app.channel_id(ALICE, "general").await;
    app.send(BOB, &channel, "earlier remark").await;
    app.send(ALICE, &channel, "@native when do we launch?").await;
    app.send(BOB, &channel, "later remark").await;

    let prompt = app.model.prompts().pop().unwrap();
    assert!(prompt.contains("Launch is March 3"));
    assert!(prompt.contains("earlier remark"));
    assert!(prompt.contains("when do we launch?"));
    assert!(!prompt.contains("later remark"));
}

#[tokio::test]
async fn retry_history_survives_a_long_tail_of_newer_messages() {
    let app = app().build();
    let channel = app.channel_id(ALICE, "general").await;
    app.send(BOB, &channel, "earlier remark").await;
    let trigger = app.send(ALICE, &channel, "@native what did bob say?").await;
    for i in 0..250 {
        channels::create_message(
            &app.state,
            "acme",
            NewMessage::from_user(&channel, "bob", &format!("later chatter {i}")),
        )
        .await
        .unwrap();
    }

    let id = trigger["id"].as_str().unwrap();
    let (status, _) = app
        .post(&format!("/api/messages/{id}/assistant"), ALICE, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let prompt = app.model.prompts().pop().unwrap();
    assert!(prompt.contains("earlier remark"));
    assert!(!prompt.contains("later chatter"));
}

#[tokio::test]
async fn context_failure_degrades_to_no_grounding() {
    let app = app().build();
    app.post(
        "/api/contexts",
        ALICE,
        json!({ "title": "Secret", "content": "grounding text", "tags": [] }),
    )
    .await;
    app.store.set_fail_context_reads(true);

    let channel = app.channel_id(ALICE, "ai-assistant").await;
    let body = app.send(ALICE, &channel, "@native hi").await;
    assert!(body["assistant"]["aiError"].is_null());
    assert_eq!(app.model.calls(), 1);
    assert!(!app.model.prompts()[0].contains("grounding text"));
}

#[tokio::test]
async fn chat_validates_and_reports_configuration() {
    let app = app().build();
    let (status, body) = app.post("/api/chat", ALICE, json!({ "message": " " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Message is required");

    app.model.reply("Chat answer");
    let (status, body) = app
        .post(
            "/api/chat",
            ALICE,
            json!({ "message": "hello", "history": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Chat answer");
    assert_eq!(body["usage"]["totalTokens"], 15);

    let offline = common::app().model(ScriptedModel::unconfigured()).build();
    let (status, body) = offline.post("/api/chat", ALICE, json!({ "message": "hello" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "SERVER_CONFIG");
}

#[tokio::test]
async fn chat_debug_phrase_echoes_context() {
    let app = app().build();
    app.post(
        "/api/contexts",
        ALICE,
        json!({ "title": "Pricing", "content": "Pro is $20", "tags": ["plans"] }),
    )
    .await;
    let (status, body) = app
        .post("/api/chat", ALICE, json!({ "message": "Debug Context please" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let text = body["message"].as_str().unwrap();
    assert!(text.contains("**Items Found:** 1"));
    assert!(text.contains("Pro is $20"));
    assert_eq!(app.model.calls(), 0);
}
