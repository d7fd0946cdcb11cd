//! Signal Brief: Binary Entrypoint
//! Boots the operator HTTP server: run trigger, health, budget and metrics routes.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    signal_brief::init_tracing();

    let router = signal_brief::app().await?;
    Ok(router.into())
}
