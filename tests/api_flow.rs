use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use cyberlearn_portal::catalog::CatalogClient;
use cyberlearn_portal::clock::Clock;
use cyberlearn_portal::db::{CellStore, MemoryCells, ENROLLMENTS_KEY};
use cyberlearn_portal::error::StoreError;
use cyberlearn_portal::{app, AppState};

fn fixed_clock() -> Clock {
    let at: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
    Clock::fixed(at)
}

fn test_app() -> (Router, AppState) {
    let catalog = CatalogClient::new(None, Duration::from_secs(1)).expect("catalog");
    let state = AppState::in_memory(catalog, fixed_clock()).expect("state");
    (app(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .expect("request");

    let res = app.clone().oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn sign_in(app: &Router, email: &str) -> (String, String) {
    let (status, body) = call(app, "POST", "/api/auth/sign-in", None, Some(json!({ "email": email, "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::OK);
    (
        body["tokens"]["accessToken"].as_str().expect("token").to_owned(),
        body["user"]["id"].as_str().expect("id").to_owned(),
    )
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = test_app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn enrollment_lifecycle_over_http() {
    let (app, _) = test_app();
    let (token, learner) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());

    let (status, rec) = call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "c1", "firstItemId": "l1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rec["learnerId"], learner.as_str());
    assert_eq!(rec["status"], "ACTIVE");
    assert_eq!(rec["progress"], 0);
    assert_eq!(rec["currentLessonId"], "l1");

    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/complete", t, Some(json!({ "itemId": "l1", "totalItemCount": 4 }))).await;
    assert_eq!(rec["progress"], 25);

    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/pause", t, None).await;
    assert_eq!(rec["status"], "PAUSED");
    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/pause", t, None).await;
    assert_eq!(rec["status"], "PAUSED");
    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/resume", t, None).await;
    assert_eq!(rec["status"], "ACTIVE");

    for id in ["l2", "l3", "l4"] {
        call(&app, "POST", "/api/enrollments/c1/complete", t, Some(json!({ "itemId": id, "totalItemCount": 4 }))).await;
    }
    let (_, rec) = call(&app, "GET", "/api/enrollments/c1", t, None).await;
    assert_eq!(rec["progress"], 100);
    assert_eq!(rec["status"], "COMPLETED");
    assert!(rec["completedAt"].is_string());

    let (_, certs) = call(&app, "GET", "/api/certificates", t, None).await;
    assert_eq!(certs.as_array().map(Vec::len), Some(1));
    assert_eq!(certs[0]["learnerName"], "Ada");

    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/reset", t, Some(json!({ "currentItemId": "l1" }))).await;
    assert_eq!(rec["status"], "ACTIVE");
    assert_eq!(rec["progress"], 0);
    assert!(rec.get("completedAt").is_none());

    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/cancel", t, None).await;
    assert_eq!(rec["status"], "CANCELLED");
    let (status, rec) = call(&app, "POST", "/api/enrollments/c1/complete", t, Some(json!({ "itemId": "l1", "totalItemCount": 4 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rec["progress"], 0);
    assert_eq!(rec["status"], "CANCELLED");

    // bodiless reset still works
    let (_, rec) = call(&app, "POST", "/api/enrollments/c1/reset", t, None).await;
    assert_eq!(rec["status"], "ACTIVE");
}

#[tokio::test]
async fn unknown_enrollment_links_back_to_listing() {
    let (app, _) = test_app();
    let (token, _) = sign_in(&app, "ada@example.com").await;
    let (status, body) = call(&app, "POST", "/api/enrollments/nope/pause", Some(token.as_str()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["back"], "/api/courses");
}

#[tokio::test]
async fn progress_routes_require_current_token() {
    let (app, _) = test_app();
    let (status, _) = call(&app, "GET", "/api/enrollments", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (old, _) = sign_in(&app, "ada@example.com").await;
    sign_in(&app, "ada@example.com").await;
    let (status, _) = call(&app, "GET", "/api/enrollments", Some(old.as_str()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_out_clears_only_that_learners_progress() {
    let (app, state) = test_app();
    state.enrollments.enroll("someone-else", "c1", None).expect("seed");

    let (token, learner) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());
    call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "c1" }))).await;
    call(&app, "POST", "/api/lab-runs", t, Some(json!({ "labId": "lab-sqli" }))).await;

    let (status, body) = call(&app, "POST", "/api/auth/sign-out", t, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clearedEnrollments"], 1);
    assert_eq!(body["clearedLabRuns"], 1);

    assert!(state.enrollments.list_for_learner(&learner).expect("list").is_empty());
    assert_eq!(state.enrollments.list_for_learner("someone-else").expect("list").len(), 1);
    let (status, _) = call(&app, "GET", "/api/auth/me", t, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Memory cells that refuse to write the enrollments cell once `locked` is set.
#[derive(Default)]
struct LockableCells {
    inner: MemoryCells,
    locked: AtomicBool,
}

impl CellStore for LockableCells {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key == ENROLLMENTS_KEY && self.locked.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("read-only").into());
        }
        self.inner.save(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

#[tokio::test]
async fn failed_progress_clear_keeps_the_session() {
    let cells = Arc::new(LockableCells::default());
    let catalog = CatalogClient::new(None, Duration::from_secs(1)).expect("catalog");
    let state = AppState::new(cells.clone(), catalog, fixed_clock()).expect("state");
    let app = app(state.clone());

    let (token, learner) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());
    call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "c1" }))).await;

    cells.locked.store(true, Ordering::SeqCst);
    let (status, _) = call(&app, "POST", "/api/auth/sign-out", t, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, me) = call(&app, "GET", "/api/auth/me", t, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], learner.as_str());

    cells.locked.store(false, Ordering::SeqCst);
    let (status, body) = call(&app, "POST", "/api/auth/sign-out", t, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clearedEnrollments"], 1);
    assert!(state.enrollments.list_for_learner(&learner).expect("list").is_empty());
}

#[tokio::test]
async fn malformed_reset_body_is_rejected_without_resetting() {
    let (app, _) = test_app();
    let (token, _) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());
    call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "c1", "firstItemId": "l2" }))).await;
    call(&app, "POST", "/api/enrollments/c1/complete", t, Some(json!({ "itemId": "l1", "totalItemCount": 4 }))).await;

    let (status, body) = call(&app, "POST", "/api/enrollments/c1/reset", t, Some(json!({ "currentItemId": 42 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, rec) = call(&app, "GET", "/api/enrollments/c1", t, None).await;
    assert_eq!(rec["currentLessonId"], "l2");
    assert_eq!(rec["progress"], 25);

    let (status, rec) = call(&app, "POST", "/api/enrollments/c1/reset", t, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rec["progress"], 0);
}

#[tokio::test]
async fn enroll_starts_at_first_lesson_and_dashboard_prices_by_region() {
    let (app, _) = test_app();
    let (token, _) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());

    let (_, rec) = call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "course-soc-analyst" }))).await;
    assert_eq!(rec["currentLessonId"], "soc-l1");
    let (_, rec) = call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "unknown" }))).await;
    assert!(rec.get("currentLessonId").is_none());

    call(&app, "POST", "/api/enrollments/course-soc-analyst/complete", t, Some(json!({ "itemId": "soc-l1", "totalItemCount": 4 }))).await;
    call(&app, "PUT", "/api/preferences/region", None, Some(json!({ "region": "GH" }))).await;

    let (_, dash) = call(&app, "GET", "/api/dashboard?sort=title", t, None).await;
    let card = &dash["enrollments"][0];
    assert_eq!(card["courseId"], "course-soc-analyst");
    assert_eq!(card["nextLessonId"], "soc-l2");
    assert_eq!(card["price"]["currency"], "GHS");
    assert!(dash["enrollments"][1].get("price").is_none());
}

#[tokio::test]
async fn lab_run_flow() {
    let (app, _) = test_app();
    let (token, _) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());

    let (_, run) = call(&app, "POST", "/api/lab-runs", t, Some(json!({ "labId": "lab-sqli" }))).await;
    assert_eq!(run["activeStepIndex"], 0);

    let (_, run) = call(&app, "POST", "/api/lab-runs/lab-sqli/step", t, Some(json!({ "index": 10, "totalSteps": 3 }))).await;
    assert_eq!(run["activeStepIndex"], 2);

    for step in ["sqli-s1", "sqli-s2", "sqli-s3"] {
        call(&app, "POST", "/api/lab-runs/lab-sqli/complete", t, Some(json!({ "stepId": step, "totalSteps": 3 }))).await;
    }
    let (_, run) = call(&app, "GET", "/api/lab-runs/lab-sqli", t, None).await;
    assert_eq!(run["progress"], 100);
    assert!(run["completedAt"].is_string());

    let (_, dash) = call(&app, "GET", "/api/dashboard", t, None).await;
    assert_eq!(dash["summary"]["labsCompleted"], 1);
    assert_eq!(dash["labs"][0]["title"], "SQL Injection Basics");
    assert_eq!(dash["labs"][0]["badge"], "completed");

    let (_, run) = call(&app, "POST", "/api/lab-runs/lab-sqli/reset", t, None).await;
    assert_eq!(run["progress"], 0);
    assert!(run.get("completedAt").is_none());

    let (status, body) = call(&app, "GET", "/api/lab-runs/lab-phishing-triage", t, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["back"], "/api/labs");
}

#[tokio::test]
async fn dashboard_filters_and_rejects_bad_status() {
    let (app, _) = test_app();
    let (token, _) = sign_in(&app, "ada@example.com").await;
    let t = Some(token.as_str());
    call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "course-soc-analyst" }))).await;
    call(&app, "POST", "/api/enrollments", t, Some(json!({ "courseId": "course-web-pentest" }))).await;
    call(&app, "POST", "/api/enrollments/course-web-pentest/pause", t, None).await;

    let (_, dash) = call(&app, "GET", "/api/dashboard?status=paused", t, None).await;
    let cards = dash["enrollments"].as_array().expect("cards");
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0]["courseSlug"], "web-application-pentesting");
    assert_eq!(cards[0]["badge"], "not-started");
    assert_eq!(dash["summary"]["active"], 1);
    assert_eq!(dash["summary"]["paused"], 1);

    let (status, _) = call(&app, "GET", "/api/dashboard?status=sleeping", t, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_falls_back_to_fixtures() {
    let (app, _) = test_app();
    let req = Request::builder().uri("/api/courses").body(Body::empty()).expect("request");
    let res = app.clone().oneshot(req).await.expect("response");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-catalog-source"], "fallback");

    let (status, course) = call(&app, "GET", "/api/courses/soc-analyst-foundations", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(course["id"], "course-soc-analyst");

    let (status, body) = call(&app, "GET", "/api/courses/no-such-course", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["back"], "/api/courses");
}

#[tokio::test]
async fn preferences_round_trip() {
    let (app, _) = test_app();
    let (_, region) = call(&app, "GET", "/api/preferences/region", None, None).await;
    assert_eq!(region["code"], "US");

    let (_, region) = call(&app, "PUT", "/api/preferences/region", None, Some(json!({ "region": "NG" }))).await;
    assert_eq!(region["currency"], "NGN");
    let (_, region) = call(&app, "GET", "/api/preferences/region", None, None).await;
    assert_eq!(region["code"], "NG");

    let (_, theme) = call(&app, "PUT", "/api/preferences/theme", None, Some(json!({ "theme": "dark" }))).await;
    assert_eq!(theme["theme"], "dark");
    let (_, theme) = call(&app, "GET", "/api/preferences/theme", None, None).await;
    assert_eq!(theme["theme"], "dark");
}
