use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::model::{BudgetState, HealthSnapshot, RunResult};
use crate::pipeline::Pipeline;
use crate::rank::feedback::{FeedbackAction, MemoryFeedbackStore, TopicKey};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub feedback: Arc<MemoryFeedbackStore>,
}

/// Operator routes. `/metrics` is merged in by the caller when a recorder is installed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources/health", get(sources_health))
        .route("/budget", get(budget))
        .route("/run", post(run))
        .route("/cancel", post(cancel))
        .route("/feedback", post(feedback))
        .route("/briefs/{date}", get(brief_for))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn sources_health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.pipeline.health().snapshot(Utc::now()))
}

async fn budget(State(state): State<AppState>) -> Json<BudgetState> {
    Json(state.pipeline.budget().get_state())
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RunReq {
    date: Option<NaiveDate>,
    force: bool,
}

async fn run(State(state): State<AppState>, body: Option<Json<RunReq>>) -> Json<RunResult> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
    Json(state.pipeline.run_pipeline(date, req.force).await)
}

#[derive(serde::Serialize)]
struct CancelResp {
    cancelled: usize,
}

async fn cancel(State(state): State<AppState>) -> Json<CancelResp> {
    Json(CancelResp {
        cancelled: state.pipeline.cancel_current(),
    })
}

async fn brief_for(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<RunResult>, (StatusCode, String)> {
    match state.pipeline.briefs().load(date) {
        Ok(Some(r)) => Ok(Json(r)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("no brief for {date}"))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Exactly one of `topic` or `source` must be set.
#[derive(Debug, serde::Deserialize)]
struct FeedbackReq {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    source: Option<String>,
    action: FeedbackAction,
}

async fn feedback(State(state): State<AppState>, Json(req): Json<FeedbackReq>) -> (StatusCode, String) {
    let key = match (req.topic, req.source) {
        (Some(t), None) if !t.trim().is_empty() => TopicKey::Topic(t.trim().to_lowercase()),
        (None, Some(s)) if !s.trim().is_empty() => TopicKey::Source(s.trim().to_string()),
        _ => return (StatusCode::BAD_REQUEST, "set exactly one of topic or source".into()),
    };
    let label = key.to_string();
    state.feedback.record(key, req.action);
    (StatusCode::ACCEPTED, label)
}
