// src/ingest/mod.rs
pub mod catalog;
pub mod rss;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::health::SourceHealthTracker;
use crate::ingest::types::FeedFetcher;
use crate::model::{HealthSnapshot, RawItem, Source, SourceId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub backoff_ms: u64,
    pub fetch_timeout_ms: u64,
    pub fetch_concurrency: usize,
    pub max_items_per_feed: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            fetch_timeout_ms: 15_000,
            fetch_concurrency: 8,
            max_items_per_feed: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AcquireOutput {
    /// Sorted by source id, then item id.
    pub items: Vec<RawItem>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_cooldown: usize,
    pub health: HealthSnapshot,
}

struct Fetched {
    source_id: SourceId,
    outcome: Result<Vec<RawItem>, FetchError>,
    latency: Duration,
    attempts: u32,
}

pub struct Acquirer {
    fetcher: Arc<dyn FeedFetcher>,
    health: Arc<SourceHealthTracker>,
    cfg: AcquireConfig,
}

impl Acquirer {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, health: Arc<SourceHealthTracker>, cfg: AcquireConfig) -> Self {
        Self {
            fetcher,
            health,
            cfg,
        }
    }

    /// Fetch every fetchable source. Per-source errors end at the source
    /// boundary: they update health and are counted, never returned.
    pub async fn run(&self, sources: &[Source], now: DateTime<Utc>) -> AcquireOutput {
        let mut out = AcquireOutput::default();

        let mut due: Vec<&Source> = Vec::with_capacity(sources.len());
        for s in sources.iter().filter(|s| s.is_active) {
            if self.health.is_fetchable(&s.id, now) {
                due.push(s);
            } else {
                tracing::debug!(target: "ingest", source = %s.id, "skipped: cooldown");
                out.skipped_cooldown += 1;
            }
        }
        out.attempted = due.len();

        let limit = self.cfg.fetch_concurrency.max(1);
        let fetches: Vec<BoxFuture<'_, Fetched>> = due.into_iter().map(|s| self.fetch_with_retry(s).boxed()).collect();
        let results: Vec<Fetched> = stream::iter(fetches).buffer_unordered(limit).collect().await;

        for f in results {
            match f.outcome {
                Ok(mut items) => {
                    self.health.record_success(&f.source_id, now, Some(f.latency));
                    out.succeeded += 1;
                    out.items.append(&mut items);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "ingest",
                        error = %e,
                        source = %f.source_id,
                        attempts = f.attempts,
                        "source fetch failed"
                    );
                    counter!("acquire_source_failures_total").increment(1);
                    self.health.record_failure(&f.source_id, now, &e.to_string());
                    out.failed += 1;
                }
            }
        }

        out.items.sort_by(|a, b| a.source_id.cmp(&b.source_id).then_with(|| a.id.cmp(&b.id)));
        out.items.dedup_by(|a, b| a.id == b.id);
        out.health = self.health.snapshot(now);
        counter!("acquire_items_total").increment(out.items.len() as u64);
        out
    }

    async fn fetch_with_retry(&self, source: &Source) -> Fetched {
        let max_attempts = self.cfg.max_attempts.max(1);
        let timeout = Duration::from_millis(self.cfg.fetch_timeout_ms);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("acquire_fetch_attempts_total").increment(1);
            let t0 = Instant::now();
            let res = match tokio::time::timeout(timeout, self.fetcher.fetch(source)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(self.cfg.fetch_timeout_ms)),
            };
            let latency = t0.elapsed();
            histogram!("acquire_fetch_ms").record(latency.as_secs_f64() * 1_000.0);

            match res {
                Ok(items) => {
                    return Fetched {
                        source_id: source.id.clone(),
                        outcome: Ok(items),
                        latency,
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < max_attempts => {
                    tracing::debug!(target: "ingest", error = %e, source = %source.id, attempt, "fetch attempt failed; retrying");
                    let shift = (attempt - 1).min(16);
                    tokio::time::sleep(Duration::from_millis(self.cfg.backoff_ms << shift)).await;
                }
                Err(e) => {
                    return Fetched {
                        source_id: source.id.clone(),
                        outcome: Err(e),
                        latency,
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
