//! Orchestrator: Acquire → Normalize → Compress → Rank → Synthesize for one run date.
//!
//! A run date is claimed before any work starts, so a date that already
//! completed is skipped unless forced and a date that is still running is never
//! entered twice. Cancellation drops the in-flight stage and yields no
//! artifact.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::budget::BudgetTracker;
use crate::compress::Compressor;
use crate::error::StoreError;
use crate::health::SourceHealthTracker;
use crate::ingest::types::SourceRepository;
use crate::ingest::Acquirer;
use crate::model::{RunResult, RunStats, RunStatus, Source, SourceId};
use crate::normalize::extract::ArticleEnricher;
use crate::normalize::Normalizer;
use crate::rank::Ranker;
use crate::synthesize::context::{gather_context, ContextProvider};
use crate::synthesize::Synthesizer;

/// Where finished runs go.
pub trait BriefStore: Send + Sync {
    fn save(&self, result: &RunResult) -> Result<(), StoreError>;
    fn load(&self, run_date: NaiveDate) -> Result<Option<RunResult>, StoreError>;
}

/// One pretty-printed JSON file per run date.
pub struct JsonDirBriefStore {
    dir: PathBuf,
}

impl JsonDirBriefStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{run_date}.json"))
    }
}

impl BriefStore for JsonDirBriefStore {
    fn save(&self, result: &RunResult) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(result.run_date);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(result)?;
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&body)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, run_date: NaiveDate) -> Result<Option<RunResult>, StoreError> {
        let path = self.path_for(run_date);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[derive(Default)]
pub struct MemoryBriefStore {
    inner: Mutex<BTreeMap<NaiveDate, RunResult>>,
}

impl MemoryBriefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl BriefStore for MemoryBriefStore {
    fn save(&self, result: &RunResult) -> Result<(), StoreError> {
        self.inner.lock().insert(result.run_date, result.clone());
        Ok(())
    }

    fn load(&self, run_date: NaiveDate) -> Result<Option<RunResult>, StoreError> {
        Ok(self.inner.lock().get(&run_date).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
}

/// Per-date claims. Only `Complete` and `Degraded` runs count as completed.
#[derive(Debug, Default)]
pub struct RunLedger {
    inner: Mutex<HashMap<NaiveDate, Phase>>,
}

impl RunLedger {
    /// Claim `date` for a new run, or say why not.
    pub fn claim(&self, date: NaiveDate, force: bool, stored_complete: bool) -> Result<(), String> {
        let mut g = self.inner.lock();
        match g.get(&date) {
            Some(Phase::Running) => return Err("run already in progress".into()),
            Some(Phase::Completed) if !force => return Err("already completed".into()),
            None if stored_complete && !force => return Err("already completed".into()),
            _ => {}
        }
        g.insert(date, Phase::Running);
        Ok(())
    }

    pub fn finish(&self, date: NaiveDate, status: &RunStatus) {
        let mut g = self.inner.lock();
        if is_completed(status) {
            g.insert(date, Phase::Completed);
        } else {
            g.remove(&date);
        }
    }

    pub fn is_running(&self, date: NaiveDate) -> bool {
        self.inner.lock().get(&date) == Some(&Phase::Running)
    }
}

fn is_completed(status: &RunStatus) -> bool {
    matches!(status, RunStatus::Complete | RunStatus::Degraded)
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Complete => "complete",
        RunStatus::Degraded => "degraded",
        RunStatus::Failed(_) => "failed",
        RunStatus::Skipped(_) => "skipped",
        RunStatus::Cancelled => "cancelled",
    }
}

/// Everything a [`Pipeline`] is assembled from.
pub struct PipelineParts {
    pub repository: Arc<dyn SourceRepository>,
    pub health: Arc<SourceHealthTracker>,
    pub budget: Arc<BudgetTracker>,
    pub acquirer: Acquirer,
    /// Full-text extraction between acquire and normalize; `None` keeps feed summaries.
    pub enricher: Option<ArticleEnricher>,
    pub normalizer: Normalizer,
    pub compressor: Compressor,
    pub ranker: Ranker,
    pub synthesizer: Synthesizer,
    pub context: Vec<Arc<dyn ContextProvider>>,
    pub context_timeout: Duration,
    pub briefs: Arc<dyn BriefStore>,
}

pub struct Pipeline {
    repository: Arc<dyn SourceRepository>,
    health: Arc<SourceHealthTracker>,
    budget: Arc<BudgetTracker>,
    acquirer: Acquirer,
    enricher: Option<ArticleEnricher>,
    normalizer: Normalizer,
    compressor: Compressor,
    ranker: Ranker,
    synthesizer: Synthesizer,
    context: Vec<Arc<dyn ContextProvider>>,
    context_timeout: Duration,
    briefs: Arc<dyn BriefStore>,
    ledger: RunLedger,
    running: Mutex<HashMap<NaiveDate, CancellationToken>>,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            repository: parts.repository,
            health: parts.health,
            budget: parts.budget,
            acquirer: parts.acquirer,
            enricher: parts.enricher,
            normalizer: parts.normalizer,
            compressor: parts.compressor,
            ranker: parts.ranker,
            synthesizer: parts.synthesizer,
            context: parts.context,
            context_timeout: parts.context_timeout,
            briefs: parts.briefs,
            ledger: RunLedger::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    pub fn briefs(&self) -> &Arc<dyn BriefStore> {
        &self.briefs
    }

    /// Cancel every run in progress. Returns how many were signalled.
    pub fn cancel_current(&self) -> usize {
        let g = self.running.lock();
        for token in g.values() {
            token.cancel();
        }
        g.len()
    }

    pub async fn run_pipeline(&self, run_date: NaiveDate, force: bool) -> RunResult {
        self.run_pipeline_at(run_date, force, Utc::now()).await
    }

    /// Same as [`run_pipeline`](Self::run_pipeline) with an explicit clock.
    pub async fn run_pipeline_at(&self, run_date: NaiveDate, force: bool, now: DateTime<Utc>) -> RunResult {
        let stored_complete = match self.briefs.load(run_date) {
            Ok(prev) => prev.map(|r| is_completed(&r.status)).unwrap_or(false),
            Err(e) => {
                tracing::warn!(target: "pipeline", date = %run_date, error = %e, "brief store lookup failed");
                false
            }
        };
        if let Err(reason) = self.ledger.claim(run_date, force, stored_complete) {
            tracing::info!(target: "pipeline", date = %run_date, reason = %reason, "run skipped");
            counter!("pipeline_runs_total", "status" => "skipped").increment(1);
            return RunResult::without_sections(run_date, RunStatus::Skipped(reason), self.health.snapshot(now));
        }

        let token = CancellationToken::new();
        self.running.lock().insert(run_date, token.clone());
        tracing::info!(target: "pipeline", date = %run_date, force, "run started");

        let result = tokio::select! {
            r = self.execute(run_date, now, &token) => r,
            _ = token.cancelled() => self.cancelled(run_date, now),
        };

        self.running.lock().remove(&run_date);
        self.budget.flush().await;
        self.ledger.finish(run_date, &result.status);
        counter!("pipeline_runs_total", "status" => status_label(&result.status)).increment(1);
        tracing::info!(
            target: "pipeline",
            date = %run_date,
            status = status_label(&result.status),
            sections = result.sections.len(),
            tokens = result.total_tokens,
            cost_usd = result.total_cost_usd,
            "run finished"
        );
        result
    }

    fn cancelled(&self, run_date: NaiveDate, now: DateTime<Utc>) -> RunResult {
        tracing::warn!(target: "pipeline", date = %run_date, "run cancelled");
        RunResult::without_sections(run_date, RunStatus::Cancelled, self.health.snapshot(now))
    }

    fn failed(&self, run_date: NaiveDate, now: DateTime<Utc>, reason: String, stats: RunStats) -> RunResult {
        tracing::error!(target: "pipeline", date = %run_date, reason = %reason, "run failed");
        let mut r = RunResult::without_sections(run_date, RunStatus::Failed(reason), self.health.snapshot(now));
        r.stats = stats;
        r
    }

    async fn execute(&self, run_date: NaiveDate, now: DateTime<Utc>, token: &CancellationToken) -> RunResult {
        let mut stats = RunStats::default();

        let sources = match self.repository.list_fetchable_sources().await {
            Ok(s) => s,
            Err(e) => return self.failed(run_date, now, format!("source repository: {e}"), stats),
        };
        if sources.is_empty() {
            return self.failed(run_date, now, "no sources configured".into(), stats);
        }
        self.health.seed(&sources);
        // Spend is metered by the clock, not by the date being briefed.
        self.budget.roll_window(now.date_naive());

        let (acquired, context) = tokio::join!(
            self.acquirer.run(&sources, now),
            gather_context(&self.context, self.context_timeout)
        );
        stats.sources_attempted = acquired.attempted;
        stats.sources_succeeded = acquired.succeeded;
        stats.sources_failed = acquired.failed;
        stats.sources_skipped_cooldown = acquired.skipped_cooldown;
        stats.items_fetched = acquired.items.len();
        tracing::info!(
            target: "pipeline",
            stage = "acquire",
            attempted = acquired.attempted,
            succeeded = acquired.succeeded,
            failed = acquired.failed,
            skipped_cooldown = acquired.skipped_cooldown,
            items = acquired.items.len(),
            context_blocks = context.blocks.len(),
            "stage done"
        );
        self.persist_health(&sources).await;

        if acquired.succeeded == 0 {
            let reason = if acquired.attempted == 0 {
                "every source is in cooldown"
            } else {
                "all sources failed"
            };
            return self.failed(run_date, now, reason.into(), stats);
        }
        if token.is_cancelled() {
            return self.cancelled(run_date, now);
        }

        let items = match &self.enricher {
            Some(enricher) => {
                let enriched = enricher.run(acquired.items).await;
                stats.articles_extracted = enriched.extracted;
                stats.extract_failed = enriched.failed;
                tracing::info!(
                    target: "pipeline",
                    stage = "extract",
                    extracted = enriched.extracted,
                    failed = enriched.failed,
                    skipped = enriched.skipped,
                    "stage done"
                );
                if token.is_cancelled() {
                    return self.cancelled(run_date, now);
                }
                enriched.items
            }
            None => acquired.items,
        };

        let weights: HashMap<SourceId, f32> = sources.iter().map(|s| (s.id.clone(), s.weight)).collect();
        let normalized = self.normalizer.run(&items, &weights);
        stats.duplicates = normalized.duplicates;
        stats.dropped_capacity = normalized.dropped_capacity;
        stats.articles = normalized.article_count();
        tracing::info!(
            target: "pipeline",
            stage = "normalize",
            articles = stats.articles,
            duplicates = stats.duplicates,
            dropped_capacity = stats.dropped_capacity,
            dropped_empty = normalized.dropped_empty,
            "stage done"
        );
        if token.is_cancelled() {
            return self.cancelled(run_date, now);
        }

        let compressed = self.compressor.run(normalized);
        stats.clusters = compressed.cluster_count();
        stats.clusters_dropped = compressed.clusters_dropped;
        tracing::info!(
            target: "pipeline",
            stage = "compress",
            clusters = stats.clusters,
            clusters_dropped = stats.clusters_dropped,
            "stage done"
        );
        if token.is_cancelled() {
            return self.cancelled(run_date, now);
        }

        let ranked = self.ranker.run(compressed, now).await;
        stats.scores_defaulted = ranked.defaulted;
        tracing::info!(
            target: "pipeline",
            stage = "rank",
            sections = ranked.sections.len(),
            defaulted = ranked.defaulted,
            "stage done"
        );
        if token.is_cancelled() {
            return self.cancelled(run_date, now);
        }

        let synthesized = self.synthesizer.run(&ranked, &context).await;
        stats.sections_fallback = synthesized.fallbacks;
        tracing::info!(
            target: "pipeline",
            stage = "synthesize",
            sections = synthesized.briefs.len(),
            fallbacks = synthesized.fallbacks,
            tokens = synthesized.total_tokens,
            cost_usd = synthesized.total_cost_usd,
            "stage done"
        );
        if token.is_cancelled() {
            return self.cancelled(run_date, now);
        }

        let degraded = stats.sources_failed > 0
            || stats.sources_skipped_cooldown > 0
            || stats.scores_defaulted > 0
            || stats.sections_fallback > 0;
        let result = RunResult {
            run_date,
            status: if degraded {
                RunStatus::Degraded
            } else {
                RunStatus::Complete
            },
            sections: synthesized.briefs,
            health_summary: self.health.snapshot(now),
            total_cost_usd: synthesized.total_cost_usd,
            total_tokens: synthesized.total_tokens,
            stats,
        };

        if let Err(e) = self.briefs.save(&result) {
            return self.failed(run_date, now, format!("brief store: {e}"), result.stats);
        }
        result
    }

    async fn persist_health(&self, sources: &[Source]) {
        for s in sources {
            let mut updated = s.clone();
            self.health.apply_to(&mut updated);
            if updated.health == s.health {
                continue;
            }
            if let Err(e) = self.repository.persist_health(&updated).await {
                tracing::warn!(target: "pipeline", source = %s.id, error = %e, "health persist failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    #[test]
    fn ledger_claims() {
        let l = RunLedger::default();
        assert!(l.claim(d(1), false, false).is_ok());
        assert!(l.is_running(d(1)));
        assert!(l.claim(d(1), true, false).is_err());
        l.finish(d(1), &RunStatus::Degraded);
        assert!(l.claim(d(1), false, false).is_err());
        assert!(l.claim(d(1), true, false).is_ok());
        l.finish(d(1), &RunStatus::Cancelled);
        assert!(l.claim(d(1), false, false).is_ok());

        assert!(l.claim(d(2), false, true).is_err());
        assert!(l.claim(d(2), true, true).is_ok());
    }

    #[test]
    fn json_dir_store_writes_one_file_per_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirBriefStore::new(dir.path().join("briefs"));
        assert!(store.load(d(3)).unwrap().is_none());
        let r = RunResult::without_sections(d(3), RunStatus::Complete, Default::default());
        store.save(&r).unwrap();
        assert!(store.path_for(d(3)).exists());
        assert_eq!(store.load(d(3)).unwrap(), Some(r));
    }
}
