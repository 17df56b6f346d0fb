use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use garl_api::config::RuntimeConfig;
use garl_api::server::build_app;
use garl_core::{CertificationTier, Dimensions};
use garl_storage::Storage;

async fn build_test_app(dir: &TempDir) -> (axum::Router, Storage) {
    let db_path = dir.path().join("ledger.db");
    let database_url = format!("sqlite://{}", db_path.display());
    let config = RuntimeConfig::for_test(database_url.clone(), dir.path().join("signing.hex"));

    let app = build_app(&config).await.expect("app should build");
    // A second handle onto the same database for test seeding.
    let storage = Storage::new(&database_url, None).await.expect("storage");
    (app, storage)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_json(uri: &str, api_key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn register(app: &axum::Router, name: &str, category: &str) -> (String, String) {
    let (status, body) = send(
        app,
        post_json(
            "/agents",
            None,
            &json!({"name": name, "category": category}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    (
        body["agent_id"].as_str().unwrap().to_string(),
        body["api_key"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn register_then_read_agent() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;

    let (agent_id, api_key) = register(&app, "smoke-agent", "coding").await;
    assert!(api_key.starts_with("garl_"));

    let (status, body) = send(&app, get(&format!("/agents/{agent_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "smoke-agent");
    assert_eq!(body["trust_score"], 50.0);
    assert_eq!(body["sovereign_id"], format!("did:garl:{agent_id}"));
    assert_eq!(body["certification_tier"], "silver");
    // The key hash never leaves the server.
    assert!(body.get("api_key_hash").is_none());
}

#[tokio::test]
async fn fresh_agent_single_success_trace() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "solo-coder", "coding").await;

    let (status, body) = send(
        &app,
        post_json(
            "/verify",
            Some(&api_key),
            &json!({
                "agent_id": agent_id,
                "task_description": "Implemented the parser",
                "status": "success",
                "duration_ms": 5000,
                "category": "coding",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "submit failed: {body}");

    let trust_score = body["trust_score"].as_f64().unwrap();
    assert!(trust_score > 50.0 && trust_score < 65.0);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["new_scores"]["cost_efficiency"], 50.0);

    // The certificate must verify via the stateless endpoint.
    let certificate = body["certificate"].clone();
    let (status, check) = send(&app, post_json("/verify/check", None, &certificate)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["valid"], true, "certificate should verify");
    assert_eq!(
        check["public_key"], certificate["proof"]["publicKey"],
        "discovery key must match the certificate key"
    );

    let (_, agent) = send(&app, get(&format!("/agents/{agent_id}"))).await;
    assert_eq!(agent["total_traces"], 1);
    assert_eq!(agent["success_rate"], 100.0);
}

#[tokio::test]
async fn duplicate_submission_returns_original_certificate() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "idempotent", "coding").await;

    let payload = json!({
        "agent_id": agent_id,
        "task_description": "one specific task",
        "status": "success",
        "duration_ms": 4000,
        "category": "coding",
    });

    let (status, first) = send(&app, post_json("/verify", Some(&api_key), &payload)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = send(&app, post_json("/verify", Some(&api_key), &payload)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(first["trace_id"], second["trace_id"]);
    assert_eq!(first["certificate"], second["certificate"]);
    assert_eq!(second["duplicate"], true);

    // No second history row, no state drift.
    assert_eq!(storage.history_count(&agent_id).await.unwrap(), 1);
    let (_, agent) = send(&app, get(&format!("/agents/{agent_id}"))).await;
    assert_eq!(agent["total_traces"], 1);
}

#[tokio::test]
async fn submission_auth_rules() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "auth-agent", "data").await;
    let (other_id, _other_key) = register(&app, "other-agent", "data").await;

    let payload = |id: &str| {
        json!({
            "agent_id": id,
            "task_description": "task",
            "status": "success",
            "duration_ms": 100,
        })
    };

    // Missing key
    let (status, _) = send(&app, post_json("/verify", None, &payload(&agent_id))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Unknown key
    let (status, body) = send(
        &app,
        post_json("/verify", Some("garl_bogus"), &payload(&agent_id)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    // Valid key, someone else's agent
    let (status, body) = send(
        &app,
        post_json("/verify", Some(&api_key), &payload(&other_id)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn sybil_endorsement_applies_zero_bonus() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;
    let (endorser_id, endorser_key) = register(&app, "weak-endorser", "coding").await;
    let (target_id, _target_key) = register(&app, "endorsee", "coding").await;

    // Endorser with 3 traces and a barely-positive score.
    let mut endorser = storage.get_agent(&endorser_id).await.unwrap().unwrap();
    endorser.total_traces = 3;
    endorser.trust_score = 52.0;
    storage.update_agent_state(&endorser).await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/endorse",
            Some(&endorser_key),
            &json!({"target_agent_id": target_id, "context": "good collaborator"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "endorse failed: {body}");
    assert_eq!(body["bonus_applied"], 0.0);

    let target = storage.get_agent(&target_id).await.unwrap().unwrap();
    assert_eq!(target.endorsement_count, 1);
    assert_eq!(target.trust_score, 50.0);

    // The pair is unique.
    let (status, body) = send(
        &app,
        post_json(
            "/endorse",
            Some(&endorser_key),
            &json!({"target_agent_id": target_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "duplicate");

    // Self-endorsement is rejected outright.
    let (status, _) = send(
        &app,
        post_json(
            "/endorse",
            Some(&endorser_key),
            &json!({"target_agent_id": endorser_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn strong_endorsement_hits_cap() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;
    let (endorser_id, endorser_key) = register(&app, "gold-endorser", "coding").await;
    let (target_id, _) = register(&app, "rising-star", "coding").await;

    let mut endorser = storage.get_agent(&endorser_id).await.unwrap().unwrap();
    endorser.total_traces = 40;
    endorser.trust_score = 90.0;
    endorser.certification_tier = CertificationTier::Gold;
    storage.update_agent_state(&endorser).await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/endorse",
            Some(&endorser_key),
            &json!({"target_agent_id": target_id, "context": "shipped a launch together"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "endorse failed: {body}");
    // 2.0 * 0.75 * 1.0 * 1.5 = 2.25, clamped to the 2.0 cap.
    assert_eq!(body["bonus_applied"], 2.0);
    assert_eq!(body["target_new_trust_score"], 52.0);

    let (_, endorsements) = send(&app, get(&format!("/endorsements/{target_id}"))).await;
    assert_eq!(endorsements["received"].as_array().unwrap().len(), 1);
    assert_eq!(endorsements["total_endorsement_bonus"], 2.0);
}

#[tokio::test]
async fn routing_orders_and_excludes() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;

    let (a_id, _) = register(&app, "router-a", "coding").await;
    let (b_id, _) = register(&app, "router-b", "coding").await;
    let (c_id, _) = register(&app, "router-c", "coding").await;

    let mut a = storage.get_agent(&a_id).await.unwrap().unwrap();
    a.total_traces = 30;
    a.trust_score = 82.0;
    a.certification_tier = CertificationTier::Gold;
    storage.update_agent_state(&a).await.unwrap();

    let mut b = storage.get_agent(&b_id).await.unwrap().unwrap();
    b.total_traces = 20;
    b.trust_score = 65.0;
    b.certification_tier = CertificationTier::Silver;
    storage.update_agent_state(&b).await.unwrap();

    // Gold score but carrying a critical anomaly: excluded from routing.
    let mut c = storage.get_agent(&c_id).await.unwrap().unwrap();
    c.total_traces = 25;
    c.trust_score = 70.0;
    c.certification_tier = CertificationTier::Gold;
    c.anomaly_flags = vec![garl_core::AnomalyFlag {
        anomaly_type: garl_core::AnomalyType::CostSpike,
        severity: garl_core::AnomalySeverity::Critical,
        message: "Cost $5.0000 is 10x+ above average $0.0100".into(),
        archived: false,
        detected_at: Utc::now(),
    }];
    storage.update_agent_state(&c).await.unwrap();

    let (status, body) = send(
        &app,
        get("/trust/route?category=coding&min_tier=silver&limit=5"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let recs = body["recommendations"].as_array().unwrap();
    let ids: Vec<&str> = recs
        .iter()
        .map(|r| r["agent_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![a_id.as_str(), b_id.as_str()]);
}

#[tokio::test]
async fn verdict_for_unknown_and_unverified_agents() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;

    // Unknown agents are reported as unregistered, not as an error.
    let (status, body) = send(&app, get("/trust/verify?agent_id=missing")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], false);

    let (agent_id, _) = register(&app, "verdict-agent", "research").await;
    let (status, body) = send(&app, get(&format!("/trust/verify?agent_id={agent_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], true);
    assert_eq!(body["verified"], false);
    // Score 50, unverified: proceed_with_monitoring / medium.
    assert_eq!(body["recommendation"], "proceed_with_monitoring");
    assert_eq!(body["risk_level"], "medium");

    // Verified, high-scoring, clean agent: trusted / low.
    let mut agent = storage.get_agent(&agent_id).await.unwrap().unwrap();
    agent.total_traces = 25;
    agent.trust_score = 80.0;
    storage.update_agent_state(&agent).await.unwrap();

    let (_, body) = send(&app, get(&format!("/trust/verify?agent_id={agent_id}"))).await;
    assert_eq!(body["verified"], true);
    assert_eq!(body["recommendation"], "trusted");
    assert_eq!(body["risk_level"], "low");
}

#[tokio::test]
async fn dormant_agent_decays_on_read() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;
    let (agent_id, _) = register(&app, "dormant", "automation").await;

    let mut agent = storage.get_agent(&agent_id).await.unwrap().unwrap();
    agent.total_traces = 12;
    agent.dimensions = Dimensions {
        reliability: 70.0,
        security: 70.0,
        speed: 70.0,
        cost_efficiency: 70.0,
        consistency: 70.0,
    };
    agent.emas = agent.dimensions;
    agent.trust_score = 70.0;
    agent.last_trace_at = Some(Utc::now() - Duration::days(100));
    storage.update_agent_state(&agent).await.unwrap();

    let (status, body) = send(&app, get(&format!("/agents/{agent_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let decayed = body["trust_score"].as_f64().unwrap();
    assert!((decayed - 68.1).abs() < 0.1, "expected ~68.1, got {decayed}");

    // The decayed view is persisted and a decay history row appended.
    let stored = storage.get_agent(&agent_id).await.unwrap().unwrap();
    assert!((stored.trust_score - decayed).abs() < 1e-9);
    let history = storage.history_for_agent(&agent_id, 10).await.unwrap();
    assert!(history
        .iter()
        .any(|h| h.event_type == garl_core::HistoryEvent::Decay));
}

#[tokio::test]
async fn batch_submission_reports_per_item_results() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "batcher", "data").await;

    let trace = |desc: &str| {
        json!({
            "agent_id": agent_id,
            "task_description": desc,
            "status": "success",
            "duration_ms": 2000,
            "category": "data",
        })
    };

    let (status, body) = send(
        &app,
        post_json(
            "/verify/batch",
            Some(&api_key),
            &json!({"traces": [trace("one"), trace("two"), trace("three")]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submitted"], 3);
    assert_eq!(body["failed"], 0);

    let (_, agent) = send(&app, get(&format!("/agents/{agent_id}"))).await;
    assert_eq!(agent["total_traces"], 3);

    // Mixed-agent batches are refused outright.
    let mut foreign = trace("four");
    foreign["agent_id"] = json!("someone-else");
    let (status, _) = send(
        &app,
        post_json(
            "/verify/batch",
            Some(&api_key),
            &json!({"traces": [trace("five"), foreign]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_lifecycle_over_http() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "hooked", "coding").await;

    let (status, created) = send(
        &app,
        post_json(
            "/webhooks",
            Some(&api_key),
            &json!({
                "agent_id": agent_id,
                "url": "https://example.com/hook",
                "events": ["anomaly", "tier_change"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create failed: {created}");
    let webhook_id = created["id"].as_str().unwrap().to_string();
    let secret = created["secret"].as_str().unwrap();
    assert!(!secret.is_empty());

    // Listing never repeats the secret.
    let list_req = Request::builder()
        .method("GET")
        .uri(format!("/webhooks/{agent_id}"))
        .header("x-api-key", &api_key)
        .body(Body::empty())
        .unwrap();
    let (status, listed) = send(&app, list_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert!(listed[0].get("secret").is_none());

    // Disable, then delete.
    let patch_req = Request::builder()
        .method("PATCH")
        .uri(format!("/webhooks/{agent_id}/{webhook_id}"))
        .header("content-type", "application/json")
        .header("x-api-key", &api_key)
        .body(Body::from(
            serde_json::to_vec(&json!({"is_active": false})).unwrap(),
        ))
        .unwrap();
    let (status, patched) = send(&app, patch_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["is_active"], false);

    let delete_req = Request::builder()
        .method("DELETE")
        .uri(format!("/webhooks/{agent_id}/{webhook_id}"))
        .header("x-api-key", &api_key)
        .body(Body::empty())
        .unwrap();
    let (status, deleted) = send(&app, delete_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);
}

#[tokio::test]
async fn anomaly_flag_raised_for_duration_spike() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;
    let (agent_id, api_key) = register(&app, "spiky", "coding").await;

    // A seasoned agent with a 1000 ms average.
    let mut agent = storage.get_agent(&agent_id).await.unwrap().unwrap();
    agent.total_traces = 15;
    agent.success_count = 15;
    agent.success_rate = 100.0;
    agent.avg_duration_ms = 1000;
    storage.update_agent_state(&agent).await.unwrap();

    let (status, _) = send(
        &app,
        post_json(
            "/verify",
            Some(&api_key),
            &json!({
                "agent_id": agent_id,
                "task_description": "unusually slow task",
                "status": "success",
                "duration_ms": 10_000,
                "category": "coding",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = storage.get_agent(&agent_id).await.unwrap().unwrap();
    assert_eq!(stored.anomaly_flags.len(), 1);
    assert_eq!(
        stored.anomaly_flags[0].anomaly_type,
        garl_core::AnomalyType::DurationSpike
    );
    assert_eq!(
        stored.anomaly_flags[0].severity,
        garl_core::AnomalySeverity::Warning
    );
}

#[tokio::test]
async fn leaderboard_and_stats_hide_sandbox_agents() {
    let dir = TempDir::new().unwrap();
    let (app, storage) = build_test_app(&dir).await;

    let (visible_id, _) = register(&app, "public-agent", "sales").await;
    let (status, sandbox) = send(
        &app,
        post_json(
            "/agents",
            None,
            &json!({"name": "sandbox-agent", "category": "sales", "is_sandbox": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sandbox_id = sandbox["agent_id"].as_str().unwrap().to_string();

    for id in [&visible_id, &sandbox_id] {
        let mut agent = storage.get_agent(id).await.unwrap().unwrap();
        agent.total_traces = 5;
        agent.trust_score = 60.0;
        storage.update_agent_state(&agent).await.unwrap();
    }

    let (_, board) = send(&app, get("/leaderboard")).await;
    let names: Vec<&str> = board
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"public-agent"));
    assert!(!names.contains(&"sandbox-agent"));
    assert_eq!(board[0]["rank"], 1);

    let (_, stats) = send(&app, get("/stats")).await;
    assert_eq!(stats["total_agents"], 1);

    // Sandbox agents stay reachable by direct lookup.
    let (status, _) = send(&app, get(&format!("/agents/{sandbox_id}"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn registration_rate_limit_trips() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;

    for i in 0..5 {
        let (status, _) = send(
            &app,
            post_json(
                "/agents",
                None,
                &json!({"name": format!("burst-{i}"), "category": "other"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(post_json(
            "/agents",
            None,
            &json!({"name": "one-too-many", "category": "other"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("Retry-After").is_some());
    assert_eq!(
        response.headers().get("X-RateLimit-Limit").unwrap(),
        &"5".parse::<axum::http::HeaderValue>().unwrap()
    );
}

#[tokio::test]
async fn discovery_document_serves_public_key() {
    let dir = TempDir::new().unwrap();
    let (app, _storage) = build_test_app(&dir).await;

    let (status, body) = send(&app, get("/.well-known/agent-card.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocol"], "garl/v1");
    // SEC1 uncompressed public key: 130 hex chars.
    assert_eq!(body["public_key"].as_str().unwrap().len(), 130);
    assert_eq!(body["signature_alg"], "ECDSA-secp256k1");
}
