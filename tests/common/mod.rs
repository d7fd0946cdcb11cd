// tests/common/mod.rs
//
// Offline fixtures shared by the integration tests: a scripted feed fetcher,
// item/article builders and a pipeline assembled around them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use signal_brief::config::AppConfig;
use signal_brief::error::FetchError;
use signal_brief::ingest::types::FeedFetcher;
use signal_brief::model::{RawItem, Source};
use signal_brief::normalize::extract::ArticleExtractor;
use signal_brief::pipeline::MemoryBriefStore;
use signal_brief::Runtime;

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap()
}

pub fn source(id: &str, section: &str) -> Source {
    Source::new(id, id.to_uppercase(), format!("https://{id}.test/rss"), section)
}

pub fn raw(source: &Source, slug: &str, title: &str, body: &str, hour: u32) -> RawItem {
    let link = format!("https://{}.test/{slug}", source.id);
    RawItem {
        id: RawItem::make_id(&source.id, Some(&link), title),
        source_id: source.id.clone(),
        section: source.section.clone(),
        title: title.to_string(),
        link: Some(link),
        body: body.to_string(),
        published_at: Some(at(hour)),
        fetched_at: at(23),
    }
}

enum Script {
    Items(Vec<RawItem>),
    Fail,
}

/// Serves canned items per source id; unknown sources fail.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    pub calls: AtomicUsize,
    /// When set, every fetch parks until the test releases it.
    gate: Option<Arc<Notify>>,
    pub started: Arc<Notify>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn serve(self, source_id: &str, items: Vec<RawItem>) -> Self {
        self.scripts.lock().insert(source_id.to_string(), Script::Items(items));
        self
    }

    pub fn fail(self, source_id: &str) -> Self {
        self.scripts.lock().insert(source_id.to_string(), Script::Fail);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.started.notify_one();
            gate.notified().await;
        }
        match self.scripts.lock().get(&source.id) {
            Some(Script::Items(items)) => Ok(items.clone()),
            Some(Script::Fail) | None => Err(FetchError::Status(503)),
        }
    }
}

/// Offline config: no retries delay, generation off, budget file in `dir`.
pub fn test_config(dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.acquire.backoff_ms = 1;
    cfg.acquire.max_attempts = 2;
    cfg.llm.enabled = false;
    cfg.llm.budget_path = dir.join("budget.json").to_string_lossy().into_owned();
    cfg.brief_dir = dir.join("briefs").to_string_lossy().into_owned();
    cfg
}

pub fn runtime(
    cfg: AppConfig,
    sources: Vec<Source>,
    fetcher: Arc<ScriptedFetcher>,
) -> (Runtime, Arc<MemoryBriefStore>) {
    runtime_with_extractor(cfg, sources, fetcher, None)
}

pub fn runtime_with_extractor(
    cfg: AppConfig,
    sources: Vec<Source>,
    fetcher: Arc<ScriptedFetcher>,
    extractor: Option<Arc<dyn ArticleExtractor>>,
) -> (Runtime, Arc<MemoryBriefStore>) {
    let briefs = Arc::new(MemoryBriefStore::new());
    let rt = Runtime::assemble(cfg, sources, fetcher, extractor, briefs.clone());
    (rt, briefs)
}

/// Two related market stories and one unrelated AI story.
pub fn newsroom() -> (Vec<Source>, ScriptedFetcher) {
    let reuters = source("reuters", "market").with_weight(0.9);
    let cnbc = source("cnbc", "market").with_weight(0.7);
    let verge = source("verge", "ai_news").with_weight(0.6);
    let fetcher = ScriptedFetcher::new()
        .serve(
            "reuters",
            vec![raw(
                &reuters,
                "oil",
                "Oil prices jump as OPEC extends output cuts",
                "Brent crude rose sharply after OPEC producers agreed to extend output cuts into next year. \
                 Analysts expect tighter supply to keep oil prices elevated.",
                8,
            )],
        )
        .serve(
            "cnbc",
            vec![raw(
                &cnbc,
                "crude",
                "Crude rallies after OPEC output cuts extended",
                "Crude oil prices climbed on Monday as OPEC extended output cuts, tightening supply. \
                 Energy stocks followed oil higher.",
                9,
            )],
        )
        .serve(
            "verge",
            vec![raw(
                &verge,
                "chips",
                "New AI accelerator chip unveiled",
                "A startup unveiled an AI accelerator chip aimed at training large language models \
                 with lower power draw.",
                10,
            )],
        );
    (vec![reuters, cnbc, verge], fetcher)
}

pub const SHORT: Duration = Duration::from_millis(20);
