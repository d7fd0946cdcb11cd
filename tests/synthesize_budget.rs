// tests/synthesize_budget.rs
//
// Synthesizer admission, budget reservation and fallbacks.
//
// Covered:
// - 5 ranked clusters, section budget fits 3 → top 3 admitted and referenced
// - remaining budget below the cost of one call → no call, clusters-only
// - generation failure → clusters-only, reservation released
// - exhausted budget → tier 4, extractive without a call
// - missing context block is omitted, present one is passed through
// - empty section → "No stories found."
// - section budget that fits no cluster → empty brief referencing nothing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

use signal_brief::budget::BudgetTracker;
use signal_brief::config::SectionSpec;
use signal_brief::error::GenerationError;
use signal_brief::llm::approx_tokens;
use signal_brief::model::{BriefMode, Cluster, NormalizedArticle, RankedCluster, ScoreOutcome};
use signal_brief::rank::RankOutput;
use signal_brief::synthesize::context::{ContextBlock, ContextBundle, ContextKind};
use signal_brief::synthesize::{
    ClusterDigest, Completion, Summarizer, SummaryRequest, SynthesizeConfig, Synthesizer,
};

const PER_TOKEN_USD: f64 = 1e-6;

#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    last: Mutex<Option<SummaryRequest>>,
    fail: bool,
    enabled_flag: Option<bool>,
}

#[async_trait::async_trait]
impl Summarizer for Recorder {
    async fn summarize(&self, req: &SummaryRequest) -> Result<Completion, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(req.clone());
        if self.fail {
            return Err(GenerationError::Status(502));
        }
        let prompt_tokens = 100;
        let completion_tokens = 40;
        Ok(Completion {
            text: format!("Summary of {} stories.", req.clusters.len()),
            prompt_tokens,
            completion_tokens,
            tokens_used: prompt_tokens + completion_tokens,
            cost_usd: self.price(prompt_tokens, completion_tokens),
        })
    }

    fn price(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens + completion_tokens) as f64 * PER_TOKEN_USD
    }

    fn enabled(&self) -> bool {
        self.enabled_flag.unwrap_or(true)
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
}

/// Five equally sized clusters in rank order a..e.
fn ranked() -> RankOutput {
    let mut out = RankOutput::default();
    let mut list = Vec::new();
    for (rank, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        let id = format!("market-{key}");
        out.articles.insert(
            id.clone(),
            NormalizedArticle {
                id: id.clone(),
                source_id: "wire".into(),
                section: "market".into(),
                title: format!("Story {key}"),
                link: Some(format!("https://wire.test/{key}")),
                clean_text: "Markets moved today. Traders reacted to the data. A third sentence follows.".into(),
                fingerprint: id.clone(),
                simhash: 0,
                published_at: Some(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()),
                fetched_at: Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
                source_weight: 0.5,
                word_count: 13,
                entities: vec![],
                duplicate_count: 0,
            },
        );
        list.push(RankedCluster {
            cluster: Cluster {
                id: format!("market/{id}"),
                section: "market".into(),
                members: vec![id.clone()],
                representative: id,
                threshold: 0.35,
                size: 1,
                keywords: vec![],
            },
            relevance_score: 1.0 - rank as f64 * 0.1,
            insight_boost: 0.0,
            final_score: 1.0 - rank as f64 * 0.1,
            rank,
            score_outcome: ScoreOutcome::Scored,
            representative_published_at: None,
        });
    }
    out.sections.insert("market".into(), list);
    out
}

fn per_cluster_tokens(ranked: &RankOutput) -> u64 {
    let rc = &ranked.sections["market"][0];
    let d = ClusterDigest::from_ranked(rc, &ranked.articles, &SynthesizeConfig::default());
    approx_tokens(&d.prompt_text())
}

fn spec(budget_tokens: u64) -> SectionSpec {
    let mut s = SectionSpec::new("market", "Market Trends");
    s.budget_tokens = budget_tokens;
    s.budget_usd = 1.0;
    s
}

#[tokio::test]
async fn admits_top_clusters_that_fit_the_section_budget() {
    let input = ranked();
    let t = per_cluster_tokens(&input);
    let budget = Arc::new(BudgetTracker::in_memory(1.0, 1_000_000, day()));
    let rec = Arc::new(Recorder::default());
    let synth = Synthesizer::new(rec.clone(), budget.clone(), vec![spec(3 * t + 1)], SynthesizeConfig::default());

    let out = synth.run(&input, &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.fallbacks, 0);

    let brief = &out.briefs[0];
    assert_eq!(brief.mode, BriefMode::Generated);
    assert_eq!(brief.cluster_ids, vec!["market/market-a", "market/market-b", "market/market-c"]);
    assert_eq!(brief.text, "Summary of 3 stories.");
    assert_eq!(brief.degradation, 0);
    assert_eq!(brief.tokens_used, 140);

    let state = budget.get_state();
    assert_eq!(state.spent_tokens, 140);
    assert!((state.spent_usd - 140.0 * PER_TOKEN_USD).abs() < 1e-12);
    assert_eq!(budget.remaining().tokens, 1_000_000 - 140, "reservation fully released");
}

#[tokio::test]
async fn budget_below_one_call_falls_back_without_calling() {
    // Plenty of tokens, almost no money: the fraction is high but the
    // reservation for one call cannot be granted.
    let budget = Arc::new(BudgetTracker::in_memory(0.000_01, 1_000_000, day()));
    let rec = Arc::new(Recorder::default());
    let synth = Synthesizer::new(rec.clone(), budget.clone(), vec![spec(100_000)], SynthesizeConfig::default());

    let out = synth.run(&ranked(), &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.fallbacks, 1);

    let brief = &out.briefs[0];
    assert_eq!(brief.mode, BriefMode::ClustersOnly);
    assert!(brief.text.starts_with("- Story a (wire) https://wire.test/a\n  Markets moved today."));
    assert_eq!(brief.tokens_used, 0);
    assert_eq!(budget.get_state().spent_usd, 0.0);
}

#[tokio::test]
async fn generation_failure_releases_reservation() {
    let budget = Arc::new(BudgetTracker::in_memory(1.0, 1_000_000, day()));
    let rec = Arc::new(Recorder {
        fail: true,
        ..Recorder::default()
    });
    let synth = Synthesizer::new(rec.clone(), budget.clone(), vec![spec(100_000)], SynthesizeConfig::default());

    let out = synth.run(&ranked(), &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.fallbacks, 1);
    assert_eq!(out.briefs[0].mode, BriefMode::ClustersOnly);
    assert_eq!(budget.remaining().tokens, 1_000_000);
    assert_eq!(budget.get_state().spent_tokens, 0);
}

#[tokio::test]
async fn exhausted_budget_goes_extractive() {
    let budget = Arc::new(BudgetTracker::in_memory(0.0, 0, day()));
    let rec = Arc::new(Recorder::default());
    let synth = Synthesizer::new(rec.clone(), budget, vec![spec(100_000)], SynthesizeConfig::default());

    let out = synth.run(&ranked(), &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.briefs[0].degradation, 4);
    assert_eq!(out.briefs[0].mode, BriefMode::ClustersOnly);
    assert_eq!(out.fallbacks, 1);
}

#[tokio::test]
async fn missing_context_is_omitted() {
    let budget = Arc::new(BudgetTracker::in_memory(1.0, 1_000_000, day()));
    let rec = Arc::new(Recorder::default());
    let section = spec(100_000).with_context(&[ContextKind::Market, ContextKind::Weather]);
    let synth = Synthesizer::new(rec.clone(), budget, vec![section], SynthesizeConfig::default());

    let mut bundle = ContextBundle::default();
    bundle.blocks.insert(
        ContextKind::Market,
        ContextBlock {
            kind: ContextKind::Market,
            title: "Markets".into(),
            body: "S&P 500 +0.4%".into(),
        },
    );
    let out = synth.run(&ranked(), &bundle).await;

    let brief = &out.briefs[0];
    assert_eq!(brief.context_included, vec!["market"]);
    assert_eq!(brief.context_omitted, vec!["weather"]);
    let req = rec.last.lock().clone().unwrap();
    assert_eq!(req.context.len(), 1);
    assert_eq!(req.context[0].kind, ContextKind::Market);
}

#[tokio::test]
async fn empty_and_disabled_sections() {
    let budget = Arc::new(BudgetTracker::in_memory(1.0, 1_000_000, day()));
    let rec = Arc::new(Recorder {
        enabled_flag: Some(false),
        ..Recorder::default()
    });
    let sections = vec![spec(100_000), SectionSpec::new("science", "Science")];
    let synth = Synthesizer::new(rec.clone(), budget, sections, SynthesizeConfig::default());

    let out = synth.run(&ranked(), &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.fallbacks, 0, "generation switched off is not a fallback");
    assert_eq!(out.briefs.len(), 2);
    assert_eq!(out.briefs[0].mode, BriefMode::ClustersOnly);
    assert_eq!(out.briefs[1].mode, BriefMode::Empty);
    assert_eq!(out.briefs[1].text, "No stories found.");
}

#[tokio::test]
async fn section_budget_admitting_nothing_references_nothing() {
    let budget = Arc::new(BudgetTracker::in_memory(1.0, 1_000_000, day()));
    let rec = Arc::new(Recorder::default());
    let synth = Synthesizer::new(rec.clone(), budget.clone(), vec![spec(1)], SynthesizeConfig::default());

    let out = synth.run(&ranked(), &ContextBundle::default()).await;
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.fallbacks, 1);

    let brief = &out.briefs[0];
    assert_eq!(brief.mode, BriefMode::Empty);
    assert!(brief.cluster_ids.is_empty(), "{:?}", brief.cluster_ids);
    assert_eq!(brief.text, "No stories fit this section's budget.");
    assert_eq!(budget.get_state().spent_tokens, 0);
}
