mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{app, ALICE, BOB, CAROL, MALLORY};

fn kinds(body: &Value) -> Vec<String> {
    let mut kinds: Vec<String> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["type"].as_str().unwrap().to_string())
        .collect();
    kinds.sort();
    kinds
}

#[tokio::test]
async fn risk_is_extracted_once_per_message() {
    let app = app().build();
    let general = app.channel_id(ALICE, "general").await;
    let message = app.send(BOB, &general, "things are on fire in prod").await;

    let (status, report) = app.post("/api/insights/generate", ALICE, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["created"], 1);
    assert_eq!(report["scanned"], 1);
    assert_eq!(report["channelCount"], 1);

    let (_, listed) = app.get("/api/insights", BOB).await;
    let items = listed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["type"], "risk");
    assert_eq!(items[0]["impact"], "high");
    assert_eq!(items[0]["sources"][0]["messageId"], message["id"]);
    assert_eq!(items[0]["sources"][0]["channel"], general.as_str());

    let (_, rerun) = app.post("/api/insights/generate", CAROL, json!({})).await;
    assert_eq!(rerun["created"], 0);
    assert_eq!(app.store.insight_count(), 1);
}

#[tokio::test]
async fn risk_suppresses_trend_but_not_decision() {
    let app = app().build();
    let general = app.channel_id(ALICE, "general").await;
    app.send(ALICE, &general, "Revenue growth stalled because of the outage").await;
    app.send(ALICE, &general, "We decided to double down on MRR growth").await;

    let (_, report) = app.post("/api/insights/generate", ALICE, json!({})).await;
    assert_eq!(report["created"], 3);
    let (_, listed) = app.get("/api/insights", ALICE).await;
    assert_eq!(kinds(&listed), vec!["decision", "risk", "trend"]);

    let (_, risks) = app.get("/api/insights?type=risk", ALICE).await;
    assert_eq!(kinds(&risks), vec!["risk"]);
    let (_, low) = app.get("/api/insights?impact=low", ALICE).await;
    assert_eq!(kinds(&low), vec!["trend"]);
}

#[tokio::test]
async fn assistant_traffic_and_other_channels_are_ignored() {
    let app = app().build();
    let assistant = app.channel_id(ALICE, "ai-assistant").await;
    let general = app.channel_id(ALICE, "general").await;
    app.send(ALICE, &assistant, "the outage is a blocker").await;
    app.send(ALICE, &general, "@native is the outage a blocker?").await;

    let (_, report) = app.post("/api/insights/generate", ALICE, json!({})).await;
    assert_eq!(report["created"], 0);
    assert_eq!(report["channelCount"], 1);
    assert_eq!(report["messageCount"], 1);
    assert_eq!(report["scanned"], report["messageCount"]);
}

#[tokio::test]
async fn a_failed_insert_skips_only_that_message() {
    let app = app().build();
    let general = app.channel_id(ALICE, "general").await;
    let doomed = app.send(ALICE, &general, "sev1 incident, decision: roll back").await;
    app.send(BOB, &general, "customers are blocked on login").await;
    app.store
        .reject_insights_from(doomed["id"].as_str().unwrap());

    let (status, report) = app.post("/api/insights/generate", ALICE, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"], 1);
    assert_eq!(report["scanned"], 2);
}

#[tokio::test]
async fn visibility_follows_the_current_channel_type() {
    let app = app().build();
    let general = app.channel_id(ALICE, "general").await;
    app.send(BOB, &general, "critical bug in billing").await;
    app.post("/api/insights/generate", ALICE, json!({})).await;
    assert_eq!(kinds(&app.get("/api/insights", ALICE).await.1), vec!["risk"]);

    let (status, _) = app
        .request(
            "PATCH",
            &format!("/api/channels/{general}"),
            Some(ALICE),
            Some(json!({ "type": "ai-assistant" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(kinds(&app.get("/api/insights", ALICE).await.1).is_empty());
    assert_eq!(app.store.insight_count(), 1);

    app.request(
        "PATCH",
        &format!("/api/channels/{general}"),
        Some(ALICE),
        Some(json!({ "type": "team" })),
    )
    .await;
    assert_eq!(kinds(&app.get("/api/insights", ALICE).await.1), vec!["risk"]);
}

#[tokio::test]
async fn insights_are_scoped_to_the_tenant() {
    let app = app().build();
    let general = app.channel_id(ALICE, "general").await;
    app.send(BOB, &general, "incident in eu-west").await;
    app.post("/api/insights/generate", ALICE, json!({})).await;

    let (_, foreign) = app.get("/api/insights", MALLORY).await;
    assert!(foreign["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_filters_are_rejected() {
    let app = app().build();
    let (status, body) = app.get("/api/insights?type=gossip", ALICE).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    let (status, _) = app.get("/api/insights?impact=extreme", ALICE).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authored_insights_are_validated() {
    let app = app().build();
    let (status, body) = app
        .post(
            "/api/insights",
            ALICE,
            json!({ "type": "summary", "impact": "medium", "title": "", "summary": "x" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Title required");

    let (status, body) = app
        .post(
            "/api/insights",
            ALICE,
            json!({ "type": "nonsense", "impact": "medium", "title": "t", "summary": "s" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid type");

    let (status, body) = app
        .post(
            "/api/insights",
            ALICE,
            json!({
                "type": "summary",
                "impact": "medium",
                "title": "Expand to EU",
                "summary": "Inbound demand from Berlin",
                "confidence": 0.6,
                "suggestedActions": [{ "label": "Draft plan", "intent": "create_task" }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["item"]["owner"], "Alice Liddell");
    assert_eq!(body["item"]["suggestedActions"][0]["id"], "action-0");
}
