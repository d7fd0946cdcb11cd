//! model.rs: records handed from one pipeline stage to the next.
//!
//! Everything here is plain data: stages own the logic, these types only carry
//! results between them (and out through the operator API as JSON).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub type SourceId = String;
pub type ItemId = String;
pub type ClusterId = String;
pub type SectionKey = String;

/// Articles of one run, keyed by item id. Ordered so iteration is repeatable.
pub type ArticleIndex = BTreeMap<ItemId, NormalizedArticle>;

/* ----------------------------
Sources and their health
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    /// Informational: 1..threshold-1 consecutive failures. Still fetched.
    Degraded,
    /// Skipped by the acquirer until `cooldown_until`.
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceHealth {
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub state: HealthState,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_failures: u64,
    /// Exponentially weighted fetch latency.
    #[serde(default)]
    pub avg_latency_ms: Option<f64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub feed_url: String,
    pub section: SectionKey,
    /// Trust/impact weight in `[0.0, 1.0]`.
    #[serde(default = "default_source_weight")]
    pub weight: f32,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub health: SourceHealth,
}

fn default_source_weight() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Source {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        feed_url: impl Into<String>,
        section: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            feed_url: feed_url.into(),
            section: section.into(),
            weight: default_source_weight(),
            region: None,
            is_active: true,
            health: SourceHealth::default(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }
}

/* ----------------------------
Items and articles
---------------------------- */

/// One fetched feed entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: ItemId,
    pub source_id: SourceId,
    pub section: SectionKey,
    pub title: String,
    pub link: Option<String>,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl RawItem {
    /// Stable id: source id plus a short hash of the link (or the title when
    /// the entry has no link).
    pub fn make_id(source_id: &str, link: Option<&str>, title: &str) -> ItemId {
        let key = link.filter(|l| !l.trim().is_empty()).unwrap_or(title);
        let mut hasher = Sha256::new();
        hasher.update(key.trim().as_bytes());
        let digest = hasher.finalize();
        let mut short = String::with_capacity(16);
        for b in digest.iter().take(8) {
            use std::fmt::Write as _;
            let _ = write!(&mut short, "{:02x}", b);
        }
        format!("{source_id}-{short}")
    }
}

/// A surviving, selected item with extracted text and dedup metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub id: ItemId,
    pub source_id: SourceId,
    pub section: SectionKey,
    pub title: String,
    pub link: Option<String>,
    pub clean_text: String,
    /// Hex SHA-256 of the case/whitespace-folded text.
    pub fingerprint: String,
    pub simhash: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub source_weight: f32,
    pub word_count: usize,
    #[serde(default)]
    pub entities: Vec<String>,
    /// Later duplicates folded into this article.
    pub duplicate_count: u32,
}

/* ----------------------------
Clusters and ranking
---------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub section: SectionKey,
    /// Member ids, sorted.
    pub members: Vec<ItemId>,
    pub representative: ItemId,
    pub threshold: f64,
    pub size: usize,
    /// Highest-weighted centroid terms; doubles as the topic key.
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored,
    /// Scoring failed or timed out; the neutral default was used.
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCluster {
    pub cluster: Cluster,
    pub relevance_score: f64,
    pub insight_boost: f64,
    pub final_score: f64,
    /// Dense per-section position, 0 is best.
    pub rank: usize,
    pub score_outcome: ScoreOutcome,
    pub representative_published_at: Option<DateTime<Utc>>,
}

/* ----------------------------
Synthesis output
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefMode {
    Generated,
    /// Titles/links digest; no generated prose.
    ClustersOnly,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionBrief {
    pub section: SectionKey,
    pub title: String,
    pub text: String,
    /// Summarized clusters in rank order.
    pub cluster_ids: Vec<ClusterId>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub mode: BriefMode,
    pub degradation: u8,
    #[serde(default)]
    pub context_included: Vec<String>,
    #[serde(default)]
    pub context_omitted: Vec<String>,
}

/* ----------------------------
Budget
---------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// Budget window (one day).
    pub window: NaiveDate,
    pub spent_usd: f64,
    pub spent_tokens: u64,
    pub max_usd: f64,
    pub max_tokens: u64,
    /// Reported spend above what a call had reserved. Not part of `spent_*`,
    /// which never pass the ceilings.
    #[serde(default)]
    pub overshoot_usd: f64,
    #[serde(default)]
    pub overshoot_tokens: u64,
}

impl BudgetState {
    pub fn fresh(window: NaiveDate, max_usd: f64, max_tokens: u64) -> Self {
        Self {
            window,
            spent_usd: 0.0,
            spent_tokens: 0,
            max_usd,
            max_tokens,
            overshoot_usd: 0.0,
            overshoot_tokens: 0,
        }
    }

    pub fn remaining_usd(&self) -> f64 {
        (self.max_usd - self.spent_usd).max(0.0)
    }

    pub fn remaining_tokens(&self) -> u64 {
        self.max_tokens.saturating_sub(self.spent_tokens)
    }
}

/* ----------------------------
Run result
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub healthy: usize,
    pub degraded: usize,
    pub cooldown: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// Finished, but some sources, scores or sections fell back.
    Degraded,
    Failed(String),
    Skipped(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub sources_skipped_cooldown: usize,
    pub items_fetched: usize,
    #[serde(default)]
    pub articles_extracted: usize,
    #[serde(default)]
    pub extract_failed: usize,
    pub duplicates: usize,
    pub dropped_capacity: usize,
    pub articles: usize,
    pub clusters: usize,
    pub clusters_dropped: usize,
    pub scores_defaulted: usize,
    pub sections_fallback: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub sections: Vec<SectionBrief>,
    pub health_summary: HealthSnapshot,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub stats: RunStats,
}

impl RunResult {
    pub fn without_sections(run_date: NaiveDate, status: RunStatus, health: HealthSnapshot) -> Self {
        Self {
            run_date,
            status,
            sections: Vec::new(),
            health_summary: health,
            total_cost_usd: 0.0,
            total_tokens: 0,
            stats: RunStats::default(),
        }
    }
}
