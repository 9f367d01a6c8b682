//! HTTP API tests driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;
use warden::api::{router, AppState};
use warden::jobs::JobQueue;
use warden::Severity;

struct TestApi {
    env: TestWarden,
    app: Router,
    _shutdown: broadcast::Sender<()>,
}

async fn test_api() -> TestApi {
    let env = TestWarden::new().await;
    let (shutdown, _) = broadcast::channel(1);
    let (jobs, _handles) = JobQueue::start(&env.config.jobs, env.warden.executor(), &shutdown);
    let app = router(AppState::new(env.warden.clone(), jobs, None));
    TestApi {
        env,
        app,
        _shutdown: shutdown,
    }
}

fn request(method: &str, uri: &str, actor: Option<(&str, &str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role, family)) = actor {
        builder = builder
            .header("x-actor-id", id)
            .header("x-actor-role", role)
            .header("x-family-id", family)
            .header("x-session-id", format!("sess-{}", id));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

const GUARDIAN: Option<(&str, &str, &str)> = Some(("parent-1", "guardian", FAMILY));
const COUNSEL: Option<(&str, &str, &str)> = Some(("counsel-1", "legal_officer", FAMILY));

#[tokio::test]
async fn test_health_is_public_and_identity_is_required() {
    let api = test_api().await;

    let (status, _) = send(&api.app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&api.app, request("GET", "/families/fam-1/policy", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_policy_update_and_validation() {
    let api = test_api().await;

    let (status, body) = send(
        &api.app,
        request("PUT", "/families/fam-1/policy", GUARDIAN, Some(json!({"retention_days": 30}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retention_days"], 30);

    let (status, body) = send(
        &api.app,
        request("PUT", "/families/fam-1/policy", GUARDIAN, Some(json!({"retention_days": 0}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // Another family's policy is out of reach.
    let (status, _) = send(
        &api.app,
        request("GET", "/families/fam-2/policy", GUARDIAN, None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_package_job_completes() {
    let api = test_api().await;
    api.env.ingest(None, Severity::Low).await;

    let (status, body) = send(
        &api.app,
        request("POST", "/families/fam-1/packages", GUARDIAN, Some(json!({"type": "ALERT"}))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let status_url = body["statusUrl"].as_str().unwrap().to_string();
    assert_eq!(status_url, format!("/jobs/{}", body["jobId"].as_str().unwrap()));

    let mut job = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&api.app, request("GET", &status_url, GUARDIAN, None)).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] == "completed" || body["state"] == "failed" {
            job = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(job["state"], "completed", "job: {}", job);
    assert_eq!(job["progress"], 100);
    assert_eq!(job["result"]["file_count"], 2);
    assert!(job["result"]["manifest_signature"].as_str().is_some());
}

#[tokio::test]
async fn test_invalid_filter_is_rejected_before_queueing() {
    let api = test_api().await;
    let (status, body) = send(
        &api.app,
        request(
            "POST",
            "/families/fam-1/packages",
            GUARDIAN,
            Some(json!({"from": "2024-02-01T00:00:00Z", "to": "2024-01-01T00:00:00Z"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_delete_workflow_over_http() {
    let api = test_api().await;
    let item = api.env.ingest(None, Severity::Low).await;

    let (status, body) = send(
        &api.app,
        request(
            "POST",
            "/delete-requests",
            GUARDIAN,
            Some(json!({"evidence_id": item.evidence_id, "reason": "sent by mistake"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");
    let request_id = body["request_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &api.app,
        request("POST", &format!("/delete-requests/{}/approve", request_id), COUNSEL, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let execute_uri = format!("/delete-requests/{}/execute", request_id);
    let (status, body) = send(&api.app, request("POST", &execute_uri, GUARDIAN, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "step_up_required");

    let (status, _) = send(
        &api.app,
        request("PUT", "/step-up/secret", GUARDIAN, Some(json!({"secret": PIN}))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &api.app,
        request("POST", "/step-up", GUARDIAN, Some(json!({"secret": PIN}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let with_token = || {
        let mut req = request("POST", &execute_uri, GUARDIAN, None);
        req.headers_mut()
            .insert("x-step-up-token", token.parse().unwrap());
        req
    };

    let (status, body) = send(&api.app, with_token()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "EXECUTED");

    // Executed requests cannot run again.
    let (status, body) = send(&api.app, with_token()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    // Deleted evidence is no longer viewable, but its custody chain is.
    let (status, _) = send(
        &api.app,
        request("GET", &format!("/evidence/{}/content", item.evidence_id), GUARDIAN, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &api.app,
        request("GET", &format!("/evidence/{}/custody", item.evidence_id), GUARDIAN, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["ok"], true);
    assert_eq!(body["events"][1]["action"], "DELETE_ATTEMPT");
}

#[tokio::test]
async fn test_legal_hold_endpoints() {
    let api = test_api().await;

    let (status, body) = send(
        &api.app,
        request(
            "POST",
            "/families/fam-1/legal-holds",
            COUNSEL,
            Some(json!({"incident_id": "inc-1", "reason": "litigation"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let hold_id = body["hold_id"].as_str().unwrap().to_string();

    // Guardians may place holds but not release them.
    let release_uri = format!("/legal-holds/{}/release", hold_id);
    let (status, _) = send(
        &api.app,
        request("POST", &release_uri, GUARDIAN, Some(json!({"reason": "done"}))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &api.app,
        request("POST", &release_uri, COUNSEL, Some(json!({"reason": "done"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &api.app,
        request("POST", &release_uri, COUNSEL, Some(json!({"reason": "again"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &api.app,
        request("GET", "/families/fam-1/legal-holds?include_released=true", GUARDIAN, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_device_key_rotation_requires_admin() {
    let api = test_api().await;
    let admin = Some(("ops-1", "administrator", "ops"));

    let (status, _) = send(
        &api.app,
        request("POST", "/devices", GUARDIAN, Some(json!({"device_id": "phone-1"}))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &api.app,
        request("POST", "/devices", admin, Some(json!({"device_id": "phone-1"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["key_version"], 1);

    let (status, _) = send(
        &api.app,
        request("POST", "/devices/phone-1/keys/commit", admin, None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, staged) = send(
        &api.app,
        request("POST", "/devices/phone-1/keys/stage", admin, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(staged["key_version"], 2);

    let (status, body) = send(
        &api.app,
        request("POST", "/devices/phone-1/keys/commit", admin, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key_version"], 2);
    assert!(body["staged_version"].is_null());
}

#[tokio::test]
async fn test_step_up_secret_cannot_be_replaced_without_current_pin() {
    let api = test_api().await;
    let item = api.env.ingest(None, Severity::Low).await;

    let (status, _) = send(
        &api.app,
        request("PUT", "/step-up/secret", GUARDIAN, Some(json!({"secret": PIN}))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(
        &api.app,
        request(
            "POST",
            "/delete-requests",
            GUARDIAN,
            Some(json!({"evidence_id": item.evidence_id, "reason": "sent by mistake"})),
        ),
    )
    .await;
    let request_id = body["request_id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &api.app,
        request("POST", &format!("/delete-requests/{}/approve", request_id), COUNSEL, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A session holder without the PIN cannot swap in their own.
    let (status, body) = send(
        &api.app,
        request("PUT", "/step-up/secret", GUARDIAN, Some(json!({"secret": "0000"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = send(
        &api.app,
        request(
            "PUT",
            "/step-up/secret",
            GUARDIAN,
            Some(json!({"secret": "0000", "current_secret": "1357"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &api.app,
        request("POST", "/step-up", GUARDIAN, Some(json!({"secret": "0000"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &api.app,
        request("GET", &format!("/delete-requests/{}", request_id), GUARDIAN, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "APPROVED");

    // The owner can rotate it with the current PIN.
    let (status, _) = send(
        &api.app,
        request(
            "PUT",
            "/step-up/secret",
            GUARDIAN,
            Some(json!({"secret": "0000", "current_secret": PIN})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(
        &api.app,
        request("POST", "/step-up", GUARDIAN, Some(json!({"secret": "0000"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
