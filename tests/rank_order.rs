// tests/rank_order.rs
//
// Ranker: strict order, neutral default on scorer failure/timeout, feedback boost.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use signal_brief::compress::CompressOutput;
use signal_brief::error::GenerationError;
use signal_brief::model::{Cluster, ScoreOutcome};
use signal_brief::rank::feedback::{
    FeedbackAction, FeedbackSignals, LogDampedWeighting, MemoryFeedbackStore, TopicKey,
};
use signal_brief::rank::{RankConfig, Ranker, RelevanceScorer, ScoreRequest};

/// Scores by cluster id; `fail` ids error, `hang` ids never answer.
struct Table {
    scores: BTreeMap<&'static str, f64>,
    fail: Vec<&'static str>,
    hang: Vec<&'static str>,
}

#[async_trait::async_trait]
impl RelevanceScorer for Table {
    async fn score(&self, req: &ScoreRequest<'_>) -> Result<f64, GenerationError> {
        let id = req.cluster.id.as_str();
        if self.fail.contains(&id) {
            return Err(GenerationError::Status(500));
        }
        if self.hang.contains(&id) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self.scores.get(id).copied().unwrap_or(0.0))
    }

    fn name(&self) -> &'static str {
        "table"
    }
}

fn cluster(id: &str, size: usize, keyword: &str) -> Cluster {
    Cluster {
        id: id.into(),
        section: "market".into(),
        members: (0..size).map(|i| format!("{id}-{i}")).collect(),
        representative: format!("{id}-0"),
        threshold: 0.35,
        size,
        keywords: vec![keyword.into()],
    }
}

fn input() -> CompressOutput {
    let mut out = CompressOutput::default();
    out.sections.insert(
        "market".into(),
        vec![
            cluster("market/a", 1, "oil"),
            cluster("market/b", 3, "rates"),
            cluster("market/c", 1, "gold"),
            cluster("market/d", 2, "chips"),
            cluster("market/e", 1, "yen"),
        ],
    );
    out
}

fn cfg() -> RankConfig {
    RankConfig {
        neutral_score: 0.5,
        score_timeout_ms: 50,
        rank_concurrency: 3,
    }
}

#[tokio::test]
async fn failures_and_timeouts_get_neutral_score() {
    let scorer = Arc::new(Table {
        scores: BTreeMap::from([("market/a", 0.9), ("market/b", 0.5), ("market/c", 0.1)]),
        fail: vec!["market/d"],
        hang: vec!["market/e"],
    });
    let ranker = Ranker::new(scorer, FeedbackSignals::none(), cfg());
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let out = ranker.run(input(), now).await;

    assert_eq!(out.defaulted, 2);
    let list = &out.sections["market"];
    let ids: Vec<_> = list.iter().map(|c| c.cluster.id.as_str()).collect();
    // 0.9 first; b/d/e tie at 0.5 and break on size (3, 2, 1); c last.
    assert_eq!(ids, vec!["market/a", "market/b", "market/d", "market/e", "market/c"]);
    let ranks: Vec<_> = list.iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3, 4]);

    let d = list.iter().find(|c| c.cluster.id == "market/d").unwrap();
    assert_eq!(d.score_outcome, ScoreOutcome::Defaulted);
    assert_eq!(d.relevance_score, 0.5);
    let a = list.iter().find(|c| c.cluster.id == "market/a").unwrap();
    assert_eq!(a.score_outcome, ScoreOutcome::Scored);
}

#[tokio::test]
async fn feedback_boost_reorders_close_scores() {
    let scorer = Arc::new(Table {
        scores: BTreeMap::from([
            ("market/a", 0.60),
            ("market/b", 0.62),
            ("market/c", 0.1),
            ("market/d", 0.1),
            ("market/e", 0.1),
        ]),
        fail: vec![],
        hang: vec![],
    });
    let store = Arc::new(MemoryFeedbackStore::new());
    for _ in 0..3 {
        store.record(TopicKey::Topic("oil".into()), FeedbackAction::Follow);
    }
    store.record(TopicKey::Topic("rates".into()), FeedbackAction::Mute);
    let signals = FeedbackSignals::new(store, Arc::new(LogDampedWeighting::default()));
    let ranker = Ranker::new(scorer, signals, cfg());
    let out = ranker.run(input(), Utc::now()).await;

    let list = &out.sections["market"];
    assert_eq!(list[0].cluster.id, "market/a");
    assert!(list[0].insight_boost > 0.0);
    let b = list.iter().find(|c| c.cluster.id == "market/b").unwrap();
    assert!(b.insight_boost < 0.0);
    assert!(list.iter().all(|c| c.insight_boost.abs() <= 0.3));
    assert!(list.iter().all(|c| (c.final_score - (c.relevance_score + c.insight_boost)).abs() < 1e-12));
}

#[tokio::test]
async fn empty_input_is_empty_output() {
    let scorer = Arc::new(Table {
        scores: BTreeMap::new(),
        fail: vec![],
        hang: vec![],
    });
    let ranker = Ranker::new(scorer, FeedbackSignals::none(), cfg());
    let out = ranker.run(CompressOutput::default(), Utc::now()).await;
    assert!(out.sections.is_empty());
    assert_eq!(out.defaulted, 0);
}
