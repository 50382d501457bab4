mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{app, subscription, ALICE, BOB, CAROL, MALLORY};
use workspace_server::store::Store;

async fn direct_channel(app: &common::TestApp) -> String {
    let (status, body) = app
        .post("/api/channels/direct", ALICE, json!({ "userId": "bob" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    body["channel"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn direct_message_pushes_to_the_other_participant() {
    let app = app().with_push().build();
    let push = app.push.clone().unwrap();
    app.post("/api/push/subscribe", ALICE, subscription("https://push.test/alice"))
        .await;
    app.post("/api/push/subscribe", BOB, subscription("https://push.test/bob"))
        .await;
    app.post("/api/push/subscribe", CAROL, subscription("https://push.test/carol"))
        .await;

    let dm = direct_channel(&app).await;
    let message = app.send(ALICE, &dm, "lunch?").await;

    let sent = push.sent();
    assert_eq!(sent.len(), 1);
    let (endpoint, payload) = &sent[0];
    assert_eq!(endpoint, "https://push.test/bob");
    assert_eq!(payload["title"], "New message from Alice Liddell");
    assert_eq!(payload["body"], "lunch?");
    assert_eq!(payload["tag"], format!("channel-{dm}"));
    assert_eq!(payload["data"]["messageId"], message["id"]);
}

#[tokio::test]
async fn team_messages_reach_everyone_but_the_author() {
    let app = app().with_push().build();
    let push = app.push.clone().unwrap();
    for (token, endpoint) in [
        (ALICE, "https://push.test/alice"),
        (BOB, "https://push.test/bob"),
        (CAROL, "https://push.test/carol"),
        (MALLORY, "https://push.test/mallory"),
    ] {
        app.post("/api/push/subscribe", token, subscription(endpoint)).await;
    }

    let general = app.channel_id(ALICE, "general").await;
    app.send(BOB, &general, &"x".repeat(150)).await;

    let mut endpoints: Vec<String> = push.sent().into_iter().map(|(e, _)| e).collect();
    endpoints.sort();
    assert_eq!(
        endpoints,
        vec!["https://push.test/alice", "https://push.test/carol"]
    );
    let body = push.sent()[0].1["body"].as_str().unwrap().to_string();
    assert_eq!(body.chars().count(), 100);
    assert!(body.ends_with("..."));
}

#[tokio::test]
async fn one_failing_endpoint_does_not_block_the_rest() {
    let app = app().with_push().build();
    let push = app.push.clone().unwrap();
    push.fail_endpoint("https://push.test/bob-laptop");
    app.post("/api/push/subscribe", BOB, subscription("https://push.test/bob-laptop"))
        .await;
    app.post("/api/push/subscribe", BOB, subscription("https://push.test/bob-phone"))
        .await;

    let dm = direct_channel(&app).await;
    let (status, _) = app
        .post("/api/messages", ALICE, json!({ "channelId": dm, "content": "ping" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let sent = push.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "https://push.test/bob-phone");
    assert_eq!(app.messages(BOB, &dm).await.len(), 1);
}

#[tokio::test]
async fn expired_endpoints_are_forgotten() {
    let app = app().with_push().build();
    let push = app.push.clone().unwrap();
    push.expire_endpoint("https://push.test/bob-old");
    app.post("/api/push/subscribe", BOB, subscription("https://push.test/bob-old"))
        .await;

    let dm = direct_channel(&app).await;
    app.send(ALICE, &dm, "still there?").await;

    let remaining = app
        .store
        .push_subscriptions_for_users(&["bob".to_string()])
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn messages_are_stored_without_push_configured() {
    let app = app().build();
    let dm = direct_channel(&app).await;
    app.send(ALICE, &dm, "no push here").await;
    assert_eq!(app.messages(BOB, &dm).await.len(), 1);
}

#[tokio::test]
async fn subscribe_and_unsubscribe() {
    let app = app().build();
    let (status, body) = app
        .post("/api/push/subscribe", BOB, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "subscription is required");

    let (status, body) = app
        .post("/api/push/subscribe", BOB, subscription("https://push.test/bob"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = app
        .request(
            "DELETE",
            "/api/push/subscribe",
            Some(BOB),
            Some(json!({ "endpoint": "https://push.test/bob" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
}

#[tokio::test]
async fn manual_send_checks_configuration_and_permissions() {
    let offline = app().build();
    let (status, body) = offline
        .post("/api/push/send", ALICE, json!({ "title": "Hi", "body": "there" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "SERVER_CONFIG");

    let app = app().with_push().build();
    let push = app.push.clone().unwrap();
    app.post("/api/push/subscribe", ALICE, subscription("https://push.test/alice"))
        .await;
    app.post("/api/push/subscribe", BOB, subscription("https://push.test/bob"))
        .await;

    let (status, body) = app
        .post("/api/push/send", ALICE, json!({ "title": "", "body": "there" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "title and body are required");

    let (status, body) = app
        .post("/api/push/send", ALICE, json!({ "title": "Hi", "body": "self test" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "sent": 1 }));

    let (status, _) = app
        .post(
            "/api/push/send",
            BOB,
            json!({ "title": "Hi", "body": "all", "organizationId": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(
            "/api/push/send",
            ALICE,
            json!({ "title": "Hi", "body": "all", "organizationId": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 2);

    let (status, _) = app
        .post(
            "/api/push/send",
            ALICE,
            json!({ "title": "Hi", "body": "psst", "userId": "mallory" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(push.sent().len(), 3);
}

#[tokio::test]
async fn invites_without_mail_fail_per_recipient() {
    let app = app().build();
    let (status, body) = app
        .post(
            "/api/invite",
            ALICE,
            json!({ "emails": ["new@acme.test"], "organizationId": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "Email delivery is not configured");
    assert_eq!(body["details"][0]["email"], "new@acme.test");
    assert_eq!(app.store.invites_for("acme").len(), 1);
}

#[tokio::test]
async fn undelivered_invites_do_not_block_a_resend() {
    let app = app().build();
    let invite = json!({ "emails": ["new@acme.test"], "organizationId": "acme" });
    app.post("/api/invite", ALICE, invite.clone()).await;

    let (status, body) = app.post("/api/invite", ALICE, invite).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "Email delivery is not configured");
    assert_eq!(app.store.invites_for("acme").len(), 2);
    assert!(app
        .store
        .invites_for("acme")
        .iter()
        .all(|invite| invite.emailed_at.is_none()));
}

#[tokio::test]
async fn invites_are_sent_and_rate_limited() {
    let app = app().with_mailer().build();
    let mailer = app.mailer.clone().unwrap();

    let (status, body) = app
        .post(
            "/api/invite",
            CAROL,
            json!({ "emails": ["one@x.test", "two@x.test"], "organizationId": "acme", "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sent"], 2);
    assert!(body["results"][0]["inviteLink"]
        .as_str()
        .unwrap()
        .starts_with("http://localhost:3000/signup?invite="));
    assert_eq!(mailer.sent.lock().unwrap().len(), 2);

    let (status, body) = app
        .post(
            "/api/invite",
            CAROL,
            json!({ "emails": ["one@x.test", "three@x.test"], "organizationId": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 1);
    assert_eq!(
        body["failed"][0]["error"],
        "Invite already sent in the last 24 hours"
    );
}

#[tokio::test]
async fn invite_permissions() {
    let app = app().with_mailer().build();
    let (status, _) = app
        .post(
            "/api/invite",
            BOB,
            json!({ "email": "x@x.test", "organizationId": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/api/invite",
            CAROL,
            json!({ "email": "x@x.test", "organizationId": "acme", "role": "owner" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/api/invite",
            ALICE,
            json!({ "email": "x@x.test", "organizationId": "globex" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post("/api/invite", ALICE, json!({ "organizationId": "acme" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "Emails (<=5) and organization ID are required"
    );
}
