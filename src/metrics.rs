use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse it.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| PrometheusBuilder::new().install_recorder())?;
        ensure_metrics_described();
        Ok(Self {
            handle: handle.clone(),
        })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs by final status.");
        describe_counter!("acquire_fetch_attempts_total", "Feed fetch attempts, retries included.");
        describe_counter!(
            "acquire_source_failures_total",
            "Sources whose fetch failed after all retries."
        );
        describe_counter!("acquire_items_total", "Feed items acquired.");
        describe_histogram!("acquire_fetch_ms", "Feed fetch latency in milliseconds.");
        describe_counter!(
            "normalize_extract_failures_total",
            "Article pages that failed to fetch or yielded too little text."
        );
        describe_counter!("normalize_duplicates_total", "Items folded into an earlier duplicate.");
        describe_counter!("compress_clusters_total", "Clusters formed.");
        describe_counter!(
            "rank_default_scores_total",
            "Clusters ranked with the neutral score after a scoring failure."
        );
        describe_counter!(
            "synth_fallback_sections_total",
            "Sections published as a clusters-only digest instead of a summary."
        );
        describe_gauge!("budget_spent_usd", "USD spent in the current budget window.");
        describe_counter!("budget_refusals_total", "Spend requests refused by the budget.");
        describe_counter!(
            "budget_settle_overshoot_total",
            "Calls that reported more spend than they had reserved."
        );
    });
}
