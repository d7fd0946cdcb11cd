// src/bootstrap.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::budget::{BudgetTracker, JsonFileBudgetStore};
use crate::compress::Compressor;
use crate::config::AppConfig;
use crate::health::SourceHealthTracker;
use crate::ingest::catalog::{load_sources_default, InMemorySourceRepository};
use crate::ingest::rss::RssFetcher;
use crate::ingest::types::FeedFetcher;
use crate::ingest::Acquirer;
use crate::llm::adapters::{LlmRelevanceScorer, LlmSummarizer};
use crate::llm::pricing::Pricing;
use crate::llm::{build_provider, Gateway};
use crate::model::Source;
use crate::normalize::extract::{ArticleEnricher, ArticleExtractor, HttpArticleExtractor};
use crate::normalize::Normalizer;
use crate::pipeline::{BriefStore, JsonDirBriefStore, Pipeline, PipelineParts};
use crate::rank::feedback::{FeedbackSignals, LogDampedWeighting, MemoryFeedbackStore};
use crate::rank::{HeuristicScorer, Ranker, RelevanceScorer};
use crate::synthesize::context::{ContextProvider, StaticContext};
use crate::synthesize::Synthesizer;

/// A fully wired pipeline plus the handles the operator API needs.
pub struct Runtime {
    pub cfg: AppConfig,
    pub pipeline: Arc<Pipeline>,
    pub gateway: Arc<Gateway>,
    pub feedback: Arc<MemoryFeedbackStore>,
}

impl Runtime {
    /// Config from `SIGNAL_BRIEF_CONFIG` / `config/pipeline.toml`, sources from
    /// `SIGNAL_BRIEF_SOURCES` / `config/sources.toml`, live RSS fetching.
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = AppConfig::load_default()?;
        let sources = load_sources_default()?;
        let fetcher = Arc::new(RssFetcher::new(
            Duration::from_millis(cfg.acquire.fetch_timeout_ms),
            cfg.acquire.max_items_per_feed,
        )?);
        let extractor: Option<Arc<dyn ArticleExtractor>> = if cfg.normalize.extract.enabled {
            Some(Arc::new(HttpArticleExtractor::new(
                Duration::from_millis(cfg.normalize.extract.timeout_ms),
                cfg.normalize.extract.max_bytes,
            )?))
        } else {
            None
        };
        let briefs = Arc::new(JsonDirBriefStore::new(&cfg.brief_dir));
        Ok(Self::assemble(cfg, sources, fetcher, extractor, briefs))
    }

    /// Wire every stage from `cfg`. The fetcher, page extractor and brief store
    /// are passed in so tests can run the real pipeline offline. Extraction is
    /// skipped without an extractor or when `normalize.extract.enabled` is off.
    pub fn assemble(
        cfg: AppConfig,
        sources: Vec<Source>,
        fetcher: Arc<dyn FeedFetcher>,
        extractor: Option<Arc<dyn ArticleExtractor>>,
        briefs: Arc<dyn BriefStore>,
    ) -> Self {
        let today = Utc::now().date_naive();
        info!(
            sources = sources.len(),
            sections = cfg.sections.len(),
            provider = %cfg.llm.provider,
            enabled = cfg.llm.enabled,
            key_len = cfg.llm.api_key.len(),
            "signal-brief config loaded"
        );

        let health = Arc::new(SourceHealthTracker::new(cfg.health.policy()));
        health.seed(&sources);
        let repository = Arc::new(InMemorySourceRepository::new(sources));

        let budget = Arc::new(BudgetTracker::new(
            cfg.llm.daily_budget_usd,
            cfg.llm.daily_token_budget,
            today,
            Arc::new(JsonFileBudgetStore::new(&cfg.llm.budget_path)),
        ));

        let gateway = Arc::new(Gateway::new(
            build_provider(&cfg.llm),
            Pricing::with_overrides(&cfg.llm.prices),
            Duration::from_millis(cfg.llm.request_timeout_ms),
        ));

        let scorer: Arc<dyn RelevanceScorer> = if cfg.llm.score_with_model && gateway.is_enabled() {
            Arc::new(LlmRelevanceScorer::new(gateway.clone(), budget.clone()))
        } else {
            Arc::new(HeuristicScorer::default())
        };
        let feedback = Arc::new(MemoryFeedbackStore::new());
        let signals = FeedbackSignals::new(feedback.clone(), Arc::new(LogDampedWeighting::default()));

        let caps: HashMap<String, usize> = cfg.sections.iter().map(|s| (s.key.clone(), s.max_articles)).collect();
        let context: Vec<Arc<dyn ContextProvider>> = cfg
            .context
            .iter()
            .map(|c| Arc::new(StaticContext::new(c.kind, c.title.clone(), c.text.clone())) as Arc<dyn ContextProvider>)
            .collect();

        let enricher = extractor
            .filter(|_| cfg.normalize.extract.enabled)
            .map(|x| ArticleEnricher::new(x, cfg.normalize.extract.clone()));

        let pipeline = Pipeline::new(PipelineParts {
            repository,
            health: health.clone(),
            budget: budget.clone(),
            acquirer: Acquirer::new(fetcher, health, cfg.acquire.clone()),
            enricher,
            normalizer: Normalizer::new(cfg.normalize.clone()).with_section_caps(caps),
            compressor: Compressor::new(cfg.compress.clone()),
            ranker: Ranker::new(scorer.clone(), signals, cfg.rank.clone()),
            synthesizer: Synthesizer::new(
                Arc::new(LlmSummarizer::new(gateway.clone())),
                budget,
                cfg.sections.clone(),
                cfg.synthesize.clone(),
            ),
            context,
            context_timeout: Duration::from_millis(cfg.synthesize.context_timeout_ms),
            briefs,
        });

        info!(
            provider = gateway.provider_name(),
            model = gateway.model(),
            scorer = scorer.name(),
            "pipeline assembled"
        );

        Self {
            cfg,
            pipeline: Arc::new(pipeline),
            gateway,
            feedback,
        }
    }
}
