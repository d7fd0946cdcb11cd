//! Synthesizer: one budget-capped summary per configured section.
//!
//! For every section the ranked clusters are admitted in rank order until the
//! section's own prompt budget would be exceeded. The admitted set goes to a
//! single summarizer call, which must first obtain a reservation on the global
//! [`BudgetTracker`]. A refused reservation, a generation failure or an
//! exhausted budget tier all produce the same clusters-only digest: headlines,
//! sources, links and a lead sentence, with no generated prose.

pub mod context;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::budget::BudgetTracker;
use crate::config::SectionSpec;
use crate::error::GenerationError;
use crate::llm::{approx_tokens, ChatMessage};
use crate::model::{ArticleIndex, BriefMode, ClusterId, RankedCluster, SectionBrief, SectionKey};
use crate::normalize::text::{lead_sentences, truncate_words};
use crate::rank::RankOutput;
use context::{ContextBlock, ContextBundle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizeConfig {
    /// Upper bound on clusters considered per section, before budget admission.
    pub max_clusters_per_section: usize,
    pub excerpt_words: usize,
    pub lead_sentences: usize,
    pub generation_timeout_ms: u64,
    pub context_timeout_ms: u64,
}

impl Default for SynthesizeConfig {
    fn default() -> Self {
        Self {
            max_clusters_per_section: 5,
            excerpt_words: 120,
            lead_sentences: 2,
            generation_timeout_ms: 60_000,
            context_timeout_ms: 5_000,
        }
    }
}

/// What the summarizer sees of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDigest {
    pub cluster_id: ClusterId,
    pub headline: String,
    pub source_id: String,
    pub link: Option<String>,
    pub excerpt: String,
    pub lead: String,
    pub keywords: Vec<String>,
    pub size: usize,
}

impl ClusterDigest {
    pub fn from_ranked(rc: &RankedCluster, articles: &ArticleIndex, cfg: &SynthesizeConfig) -> Self {
        let rep = articles.get(&rc.cluster.representative);
        let text = rep.map(|a| a.clean_text.as_str()).unwrap_or_default();
        Self {
            cluster_id: rc.cluster.id.clone(),
            headline: rep
                .map(|a| a.title.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| rc.cluster.keywords.join(", ")),
            source_id: rep.map(|a| a.source_id.clone()).unwrap_or_default(),
            link: rep.and_then(|a| a.link.clone()),
            excerpt: truncate_words(text, cfg.excerpt_words),
            lead: lead_sentences(text, cfg.lead_sentences.max(1)),
            keywords: rc.cluster.keywords.clone(),
            size: rc.cluster.size,
        }
    }

    /// The cluster as it appears in a summary prompt.
    pub fn prompt_text(&self) -> String {
        format!(
            "{} ({}; {} reports)\n{}\n",
            self.headline, self.source_id, self.size, self.excerpt
        )
    }
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub section: SectionKey,
    pub title: String,
    pub clusters: Vec<ClusterDigest>,
    pub context: Vec<ContextBlock>,
    pub degradation: u8,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, req: &SummaryRequest) -> Result<Completion, GenerationError>;

    /// USD for the given token counts on this summarizer's model.
    fn price(&self, prompt_tokens: u64, completion_tokens: u64) -> f64;

    /// `false` when generation is switched off by configuration.
    fn enabled(&self) -> bool {
        true
    }
}

/// Verbosity tier from the remaining share of the global budget.
pub fn degradation_tier(remaining_fraction: f64) -> u8 {
    match remaining_fraction {
        f if f > 0.60 => 0,
        f if f > 0.30 => 1,
        f if f > 0.15 => 2,
        f if f > 0.05 => 3,
        _ => 4,
    }
}

/// Completion cap per tier. Tier 4 makes no call.
pub fn max_tokens_for_tier(tier: u8) -> Option<u32> {
    match tier {
        0 => Some(400),
        1 => Some(250),
        2 => Some(150),
        3 => Some(80),
        _ => None,
    }
}

fn system_prompt(tier: u8) -> &'static str {
    match tier {
        0 => "You write a daily news brief. Summarize these story clusters in 3-5 sentences each. \
              Include key claims, note framing differences between sources and highlight contradictions. \
              Plain text, no markdown headings.",
        1 => "You write a daily news brief. Summarize these story clusters in 2-3 sentences each. \
              Focus on the key facts. Plain text.",
        2 => "You write a daily news brief. Summarize each story cluster in 1-2 sentences. Plain text.",
        _ => "Summarize each story cluster in one sentence. Plain text.",
    }
}

/// Chat messages for a section summary. Shared by every model-backed summarizer
/// so reservations and real calls see the same prompt.
pub fn render_messages(req: &SummaryRequest) -> Vec<ChatMessage> {
    let mut user = format!("Section: {}\n", req.title);
    if !req.context.is_empty() {
        user.push_str("\nContext:\n");
        for block in &req.context {
            user.push_str(&format!("[{}] {}\n", block.title, block.body));
        }
    }
    user.push_str("\nStories:\n");
    for (i, d) in req.clusters.iter().enumerate() {
        user.push_str(&format!("{}. {}", i + 1, d.prompt_text()));
    }
    vec![ChatMessage::system(system_prompt(req.degradation)), ChatMessage::user(user)]
}

/// Extractive digest: one entry per cluster, no generated prose.
pub fn clusters_only_text(digests: &[ClusterDigest], context: &[ContextBlock]) -> String {
    let mut out = String::new();
    for block in context {
        out.push_str(&format!("{}: {}\n", block.title, block.body));
    }
    if !context.is_empty() {
        out.push('\n');
    }
    for d in digests {
        out.push_str(&format!("- {}", d.headline));
        if !d.source_id.is_empty() {
            out.push_str(&format!(" ({})", d.source_id));
        }
        if let Some(link) = &d.link {
            out.push_str(&format!(" {link}"));
        }
        out.push('\n');
        if !d.lead.is_empty() {
            out.push_str(&format!("  {}\n", d.lead));
        }
    }
    out.trim_end().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct SynthesizeOutput {
    /// In configured section order.
    pub briefs: Vec<SectionBrief>,
    /// Sections that wanted a generated summary and did not get one.
    pub fallbacks: usize,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

pub struct Synthesizer {
    summarizer: Arc<dyn Summarizer>,
    budget: Arc<BudgetTracker>,
    sections: Vec<SectionSpec>,
    cfg: SynthesizeConfig,
}

impl Synthesizer {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        budget: Arc<BudgetTracker>,
        sections: Vec<SectionSpec>,
        cfg: SynthesizeConfig,
    ) -> Self {
        Self {
            summarizer,
            budget,
            sections,
            cfg,
        }
    }

    /// Sections run one after another so each sees the budget the previous one left.
    pub async fn run(&self, ranked: &RankOutput, context: &ContextBundle) -> SynthesizeOutput {
        let mut out = SynthesizeOutput::default();
        for spec in &self.sections {
            let clusters = ranked.sections.get(&spec.key).map(Vec::as_slice).unwrap_or(&[]);
            let (brief, fell_back) = self.section(spec, clusters, &ranked.articles, context).await;
            if fell_back {
                out.fallbacks += 1;
                counter!("synth_fallback_sections_total").increment(1);
            }
            out.total_tokens += brief.tokens_used;
            out.total_cost_usd += brief.cost_usd;
            out.briefs.push(brief);
        }
        for key in ranked.sections.keys() {
            if !self.sections.iter().any(|s| &s.key == key) {
                tracing::debug!(target: "synthesize", section = %key, "ranked section not configured; skipped");
            }
        }
        out
    }

    /// Returns the brief and whether it fell back from generation.
    pub async fn section(
        &self,
        spec: &SectionSpec,
        clusters: &[RankedCluster],
        articles: &ArticleIndex,
        context: &ContextBundle,
    ) -> (SectionBrief, bool) {
        let mut brief = SectionBrief {
            section: spec.key.clone(),
            title: spec.title.clone(),
            text: String::new(),
            cluster_ids: Vec::new(),
            tokens_used: 0,
            cost_usd: 0.0,
            mode: BriefMode::Empty,
            degradation: 0,
            context_included: Vec::new(),
            context_omitted: Vec::new(),
        };
        if clusters.is_empty() {
            brief.text = "No stories found.".to_string();
            return (brief, false);
        }

        let mut blocks: Vec<ContextBlock> = Vec::new();
        for kind in &spec.context {
            match context.get(*kind) {
                Some(b) => {
                    brief.context_included.push(kind.to_string());
                    blocks.push(b.clone());
                }
                None => brief.context_omitted.push(kind.to_string()),
            }
        }

        let candidates: Vec<ClusterDigest> = clusters
            .iter()
            .take(self.cfg.max_clusters_per_section.max(1))
            .map(|rc| ClusterDigest::from_ranked(rc, articles, &self.cfg))
            .collect();
        let admitted = self.admit(spec, &candidates);
        let tier = degradation_tier(self.budget.remaining_fraction());
        brief.degradation = tier;

        // The brief only ever references admitted clusters.
        if admitted.is_empty() {
            tracing::info!(
                target: "synthesize",
                section = %spec.key,
                candidates = candidates.len(),
                "no cluster fits section budget"
            );
            brief.text = "No stories fit this section's budget.".to_string();
            return (brief, true);
        }
        brief.cluster_ids = admitted.iter().map(|d| d.cluster_id.clone()).collect();

        let fallback = |brief: &mut SectionBrief| {
            brief.mode = BriefMode::ClustersOnly;
            brief.text = clusters_only_text(&admitted, &blocks);
        };

        if !self.summarizer.enabled() {
            fallback(&mut brief);
            return (brief, false);
        }
        let max_tokens = match max_tokens_for_tier(tier) {
            Some(m) => m,
            None => {
                tracing::info!(target: "synthesize", section = %spec.key, tier, "extractive digest");
                fallback(&mut brief);
                return (brief, true);
            }
        };

        let req = SummaryRequest {
            section: spec.key.clone(),
            title: spec.title.clone(),
            clusters: admitted.clone(),
            context: blocks.clone(),
            degradation: tier,
            max_tokens,
        };
        let prompt_bytes: u64 = render_messages(&req).iter().map(|m| m.content.len() as u64).sum();
        let bound_usd = self.summarizer.price(prompt_bytes, max_tokens as u64);
        let bound_tokens = prompt_bytes + max_tokens as u64;

        let reservation = match self.budget.reserve(bound_usd, bound_tokens) {
            Ok(r) => r,
            Err(e) => {
                tracing::info!(target: "synthesize", section = %spec.key, error = %e, "budget refused; clusters-only digest");
                fallback(&mut brief);
                return (brief, true);
            }
        };

        let timeout = Duration::from_millis(self.cfg.generation_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.summarizer.summarize(&req)).await {
            Ok(r) => r,
            Err(_) => Err(GenerationError::Timeout(self.cfg.generation_timeout_ms)),
        };
        match result {
            Ok(c) => {
                reservation.settle(c.cost_usd, c.tokens_used);
                brief.mode = BriefMode::Generated;
                brief.text = c.text;
                brief.tokens_used = c.tokens_used;
                brief.cost_usd = c.cost_usd;
                tracing::info!(
                    target: "synthesize",
                    section = %spec.key,
                    clusters = brief.cluster_ids.len(),
                    tokens = c.tokens_used,
                    cost_usd = c.cost_usd,
                    tier,
                    "section generated"
                );
                (brief, false)
            }
            Err(e) => {
                drop(reservation);
                tracing::warn!(target: "synthesize", section = %spec.key, error = %e, "generation failed; clusters-only digest");
                fallback(&mut brief);
                (brief, true)
            }
        }
    }

    /// Clusters in rank order until the next one would push the section's
    /// estimated prompt tokens or cost past its budget.
    fn admit(&self, spec: &SectionSpec, candidates: &[ClusterDigest]) -> Vec<ClusterDigest> {
        let mut tokens = 0u64;
        let mut usd = 0.0f64;
        let mut admitted = Vec::new();
        for d in candidates {
            let t = approx_tokens(&d.prompt_text());
            let c = self.summarizer.price(t, 0);
            if tokens + t > spec.budget_tokens || usd + c > spec.budget_usd {
                break;
            }
            tokens += t;
            usd += c;
            admitted.push(d.clone());
        }
        admitted
    }
}
