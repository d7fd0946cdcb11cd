// src/config/mod.rs
pub mod llm;

use anyhow::{anyhow, Context, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compress::CompressConfig;
use crate::health::HealthPolicy;
use crate::ingest::AcquireConfig;
use crate::normalize::NormalizeConfig;
use crate::rank::RankConfig;
use crate::synthesize::context::ContextKind;
use crate::synthesize::SynthesizeConfig;
use llm::LlmConfig;

const ENV_PATH: &str = "SIGNAL_BRIEF_CONFIG";
/// Thirty days.
const MAX_COOLDOWN_MINUTES: i64 = 43_200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub cooldown_minutes: i64,
    pub latency_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let p = HealthPolicy::default();
        Self {
            failure_threshold: p.failure_threshold,
            cooldown_minutes: p.cooldown.num_minutes(),
            latency_alpha: p.latency_alpha,
        }
    }
}

impl HealthConfig {
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.failure_threshold,
            cooldown: ChronoDuration::minutes(self.cooldown_minutes),
            latency_alpha: self.latency_alpha,
        }
    }
}

fn default_max_articles() -> usize {
    40
}
fn default_section_tokens() -> u64 {
    6_000
}
fn default_section_usd() -> f64 {
    0.05
}

/// One brief section: which clusters feed it and how much it may spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub key: String,
    pub title: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    /// Estimated prompt tokens admitted into one section summary.
    #[serde(default = "default_section_tokens")]
    pub budget_tokens: u64,
    #[serde(default = "default_section_usd")]
    pub budget_usd: f64,
    #[serde(default)]
    pub context: Vec<ContextKind>,
}

impl SectionSpec {
    pub fn new(key: &str, title: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            max_articles: default_max_articles(),
            budget_tokens: default_section_tokens(),
            budget_usd: default_section_usd(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, kinds: &[ContextKind]) -> Self {
        self.context = kinds.to_vec();
        self
    }
}

pub fn default_sections() -> Vec<SectionSpec> {
    vec![
        SectionSpec::new("general_news_us", "US News").with_context(&[ContextKind::Weather]),
        SectionSpec::new("market", "Market Trends").with_context(&[ContextKind::Market, ContextKind::Thesis]),
        SectionSpec::new("ai_news", "AI & Tech"),
        SectionSpec::new("general_news_india", "India"),
        SectionSpec::new("general_news_geopolitics", "Geopolitics"),
        SectionSpec::new("science", "Science"),
        SectionSpec::new("health", "Health"),
    ]
}

/// Context text supplied directly in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticContextSpec {
    pub kind: ContextKind,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub health: HealthConfig,
    pub acquire: AcquireConfig,
    pub normalize: NormalizeConfig,
    pub compress: CompressConfig,
    pub rank: RankConfig,
    pub synthesize: SynthesizeConfig,
    pub llm: LlmConfig,
    pub sections: Vec<SectionSpec>,
    pub context: Vec<StaticContextSpec>,
    /// Where finished run results are written, one JSON file per date.
    pub brief_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            health: HealthConfig::default(),
            acquire: AcquireConfig::default(),
            normalize: NormalizeConfig::default(),
            compress: CompressConfig::default(),
            rank: RankConfig::default(),
            synthesize: SynthesizeConfig::default(),
            llm: LlmConfig::default(),
            sections: default_sections(),
            context: Vec::new(),
            brief_dir: "briefs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path (TOML or JSON by extension), then apply env
    /// overrides and sanitize.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg: AppConfig = if ext == "json" {
            serde_json::from_str(&content).context("parsing json config")?
        } else {
            toml::from_str(&content).context("parsing toml config")?
        };
        cfg.finish();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $SIGNAL_BRIEF_CONFIG
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/pipeline.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let mut cfg = AppConfig::default();
        cfg.finish();
        Ok(cfg)
    }

    fn finish(&mut self) {
        self.apply_env();
        self.sanitize();
    }

    /// Env overrides: SOURCE_FAILURE_THRESHOLD, SOURCE_COOLDOWN_MINUTES and the
    /// LLM_* budget/model variables.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u32>("SOURCE_FAILURE_THRESHOLD") {
            self.health.failure_threshold = v;
        }
        if let Some(v) = env_parse::<i64>("SOURCE_COOLDOWN_MINUTES") {
            self.health.cooldown_minutes = v;
        }
        self.llm.apply_env();
    }

    pub fn sanitize(&mut self) {
        let d = AppConfig::default();
        if self.health.failure_threshold == 0 {
            self.health.failure_threshold = d.health.failure_threshold;
        }
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&self.health.cooldown_minutes) {
            self.health.cooldown_minutes = d.health.cooldown_minutes;
        }
        if !(self.health.latency_alpha > 0.0 && self.health.latency_alpha <= 1.0) {
            self.health.latency_alpha = d.health.latency_alpha;
        }
        clamp_unit(&mut self.normalize.title_similarity, d.normalize.title_similarity);
        clamp_unit(&mut self.compress.similarity_threshold, d.compress.similarity_threshold);
        clamp_unit(&mut self.rank.neutral_score, d.rank.neutral_score);
        if self.acquire.max_attempts == 0 {
            self.acquire.max_attempts = 1;
        }
        if self.acquire.fetch_concurrency == 0 {
            self.acquire.fetch_concurrency = d.acquire.fetch_concurrency;
        }
        if self.normalize.extract.workers == 0 {
            self.normalize.extract.workers = d.normalize.extract.workers;
        }
        if self.normalize.extract.timeout_ms == 0 {
            self.normalize.extract.timeout_ms = d.normalize.extract.timeout_ms;
        }
        if self.rank.rank_concurrency == 0 {
            self.rank.rank_concurrency = d.rank.rank_concurrency;
        }
        self.llm.sanitize();

        let mut seen = HashSet::new();
        self.sections.retain_mut(|s| {
            s.key = s.key.trim().to_string();
            if !s.budget_usd.is_finite() || s.budget_usd < 0.0 {
                s.budget_usd = default_section_usd();
            }
            !s.key.is_empty() && seen.insert(s.key.clone())
        });
        if self.sections.is_empty() {
            self.sections = default_sections();
        }
    }
}

fn clamp_unit(v: &mut f64, fallback: f64) {
    if !v.is_finite() {
        *v = fallback;
    }
    *v = v.clamp(0.0, 1.0);
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
