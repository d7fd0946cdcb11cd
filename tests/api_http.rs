// tests/api_http.rs
//
// HTTP-level tests for the operator Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /budget, GET /sources/health
// - POST /run (then GET /briefs/{date})
// - POST /feedback validation

mod common;

use std::sync::Arc;

use serde_json::{json, Value as Json};
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use signal_brief::api::{self, AppState};

use common::{newsroom, runtime, test_config};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_router(dir: &std::path::Path) -> Router {
    let (sources, fetcher) = newsroom();
    let (rt, _briefs) = runtime(test_config(dir), sources, Arc::new(fetcher));
    api::router(AppState {
        pipeline: rt.pipeline,
        feedback: rt.feedback,
    })
}

async fn body_json(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json")
}

#[tokio::test]
async fn health_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path());
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn budget_and_source_health_are_json() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path());

    let resp = app
        .clone()
        .oneshot(Request::get("/budget").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["spent_usd"], 0.0);
    assert_eq!(v["max_tokens"], 100_000);

    let resp = app
        .oneshot(Request::get("/sources/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["healthy"], 3);
    assert_eq!(v["cooldown"], 0);
}

#[tokio::test]
async fn run_then_fetch_stored_brief() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path());

    let missing = app
        .clone()
        .oneshot(Request::get("/briefs/2026-06-02").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let req = Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "date": "2026-06-02", "force": false }).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["run_date"], "2026-06-02");
    assert!(v["status"]["status"] == "complete" || v["status"]["status"] == "degraded", "{v}");
    assert!(v["sections"].as_array().map(|a| !a.is_empty()).unwrap_or(false));

    let stored = app
        .oneshot(Request::get("/briefs/2026-06-02").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(stored.status(), StatusCode::OK);
    let s = body_json(stored).await;
    assert_eq!(s["run_date"], "2026-06-02");
}

#[tokio::test]
async fn feedback_requires_exactly_one_key() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path());

    let post = |payload: Json| {
        Request::builder()
            .method("POST")
            .uri("/feedback")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let ok = app
        .clone()
        .oneshot(post(json!({ "topic": "Oil", "action": "follow" })))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::ACCEPTED);
    let bytes = body::to_bytes(ok.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"topic:oil");

    let both = app
        .clone()
        .oneshot(post(json!({ "topic": "oil", "source": "reuters", "action": "mute" })))
        .await
        .unwrap();
    assert_eq!(both.status(), StatusCode::BAD_REQUEST);

    let bad_action = app
        .oneshot(post(json!({ "source": "reuters", "action": "love" })))
        .await
        .unwrap();
    assert!(bad_action.status().is_client_error());
}
