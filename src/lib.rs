// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bootstrap;
pub mod budget;
pub mod compress;
pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod synthesize;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::bootstrap::Runtime;
pub use crate::model::{RunResult, RunStatus};
pub use crate::pipeline::Pipeline;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("signal_brief=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Operator router with `/metrics` merged in, built from the environment.
pub async fn app() -> anyhow::Result<axum::Router> {
    let rt = Runtime::from_env()?;
    let metrics = crate::metrics::Metrics::init()?;
    let state = api::AppState {
        pipeline: rt.pipeline,
        feedback: rt.feedback,
    };
    Ok(router(state).merge(metrics.router()))
}
