//! Ranker: relevance score plus feedback boost, then a strict per-section order.

pub mod feedback;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::compress::CompressOutput;
use crate::error::GenerationError;
use crate::model::{ArticleIndex, Cluster, NormalizedArticle, RankedCluster, ScoreOutcome, SectionKey};
use feedback::{FeedbackSignals, TopicKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    /// Used whenever scoring fails or times out.
    pub neutral_score: f64,
    pub score_timeout_ms: u64,
    pub rank_concurrency: usize,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            neutral_score: 0.5,
            score_timeout_ms: 20_000,
            rank_concurrency: 4,
        }
    }
}

/// Everything a scorer may look at for one cluster.
#[derive(Debug, Clone)]
pub struct ScoreRequest<'a> {
    pub section: &'a str,
    pub cluster: &'a Cluster,
    pub representative: Option<&'a NormalizedArticle>,
    pub members: Vec<&'a NormalizedArticle>,
    pub now: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Relevance in `[0, 1]`; out-of-range values are clamped by the ranker.
    async fn score(&self, req: &ScoreRequest<'_>) -> Result<f64, GenerationError>;

    fn name(&self) -> &'static str;
}

/// Source trust, recency, source diversity and a neutral preference term.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScorer {
    pub weight_trust: f64,
    pub weight_recency: f64,
    pub weight_diversity: f64,
    pub weight_preference: f64,
    pub recency_half_life_hours: f64,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            weight_trust: 0.40,
            weight_recency: 0.25,
            weight_diversity: 0.15,
            weight_preference: 0.20,
            recency_half_life_hours: 12.0,
        }
    }
}

impl HeuristicScorer {
    pub fn compute(&self, req: &ScoreRequest<'_>) -> f64 {
        let members = &req.members;
        let trust = if members.is_empty() {
            0.5
        } else {
            members.iter().map(|a| a.source_weight as f64).sum::<f64>() / members.len() as f64
        };

        let recency = match members.iter().filter_map(|a| a.published_at).max() {
            Some(latest) => {
                let hours = (req.now - latest).num_seconds().max(0) as f64 / 3_600.0;
                (-std::f64::consts::LN_2 * hours / self.recency_half_life_hours).exp()
            }
            None => 0.5,
        };

        let unique_sources: BTreeSet<&str> = members.iter().map(|a| a.source_id.as_str()).collect();
        let diversity = (unique_sources.len() as f64 / 3.0).min(1.0);

        trust * self.weight_trust
            + recency * self.weight_recency
            + diversity * self.weight_diversity
            + 0.5 * self.weight_preference
    }
}

#[async_trait::async_trait]
impl RelevanceScorer for HeuristicScorer {
    async fn score(&self, req: &ScoreRequest<'_>) -> Result<f64, GenerationError> {
        Ok(self.compute(req))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

#[derive(Debug, Clone, Default)]
pub struct RankOutput {
    /// Per section, in rank order.
    pub sections: BTreeMap<SectionKey, Vec<RankedCluster>>,
    pub articles: ArticleIndex,
    pub defaulted: usize,
}

/// Higher final score, then larger cluster, then earlier representative
/// (undated last), then cluster id.
pub fn rank_order(a: &RankedCluster, b: &RankedCluster) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| b.cluster.size.cmp(&a.cluster.size))
        .then_with(|| match (a.representative_published_at, b.representative_published_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.cluster.id.cmp(&b.cluster.id))
}

pub struct Ranker {
    scorer: Arc<dyn RelevanceScorer>,
    feedback: FeedbackSignals,
    cfg: RankConfig,
}

impl Ranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, feedback: FeedbackSignals, cfg: RankConfig) -> Self {
        Self {
            scorer,
            feedback,
            cfg,
        }
    }

    pub async fn run(&self, input: CompressOutput, now: DateTime<Utc>) -> RankOutput {
        let articles = input.articles;
        let jobs: Vec<&Cluster> = input.sections.values().flatten().collect();
        let limit = self.cfg.rank_concurrency.max(1);

        let scoring: Vec<BoxFuture<'_, RankedCluster>> =
            jobs.into_iter().map(|c| self.rank_one(c, &articles, now).boxed()).collect();
        let scored: Vec<RankedCluster> = stream::iter(scoring).buffer_unordered(limit).collect().await;

        let mut out = RankOutput::default();
        for rc in scored {
            if rc.score_outcome == ScoreOutcome::Defaulted {
                out.defaulted += 1;
            }
            out.sections.entry(rc.cluster.section.clone()).or_default().push(rc);
        }
        for (section, list) in out.sections.iter_mut() {
            list.sort_by(rank_order);
            for (i, rc) in list.iter_mut().enumerate() {
                rc.rank = i;
            }
            tracing::debug!(
                target: "rank",
                section = %section,
                clusters = list.len(),
                top = list.first().map(|c| c.cluster.id.as_str()).unwrap_or(""),
                "section ranked"
            );
        }
        counter!("rank_default_scores_total").increment(out.defaulted as u64);
        out.articles = articles;
        out
    }

    async fn rank_one(&self, cluster: &Cluster, articles: &ArticleIndex, now: DateTime<Utc>) -> RankedCluster {
        let members: Vec<&NormalizedArticle> = cluster.members.iter().filter_map(|id| articles.get(id)).collect();
        let representative = articles.get(&cluster.representative);
        let req = ScoreRequest {
            section: &cluster.section,
            cluster,
            representative,
            members,
            now,
        };

        let timeout = Duration::from_millis(self.cfg.score_timeout_ms);
        let (relevance, outcome) = match tokio::time::timeout(timeout, self.scorer.score(&req)).await {
            Ok(Ok(s)) if s.is_finite() => (s.clamp(0.0, 1.0), ScoreOutcome::Scored),
            Ok(Ok(s)) => {
                tracing::warn!(target: "rank", cluster = %cluster.id, score = s, "non-finite score; using neutral");
                (self.cfg.neutral_score, ScoreOutcome::Defaulted)
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "rank", cluster = %cluster.id, scorer = self.scorer.name(), error = %e, "scoring failed; using neutral");
                (self.cfg.neutral_score, ScoreOutcome::Defaulted)
            }
            Err(_) => {
                tracing::warn!(target: "rank", cluster = %cluster.id, scorer = self.scorer.name(), "scoring timed out; using neutral");
                (self.cfg.neutral_score, ScoreOutcome::Defaulted)
            }
        };

        let mut keys: Vec<TopicKey> = cluster.keywords.iter().map(|k| TopicKey::Topic(k.clone())).collect();
        let sources: BTreeSet<&str> = req.members.iter().map(|a| a.source_id.as_str()).collect();
        keys.extend(sources.into_iter().map(|s| TopicKey::Source(s.to_string())));
        let boost = self.feedback.insight_boost_for(&keys).await;

        RankedCluster {
            cluster: cluster.clone(),
            relevance_score: relevance,
            insight_boost: boost,
            final_score: relevance + boost,
            rank: 0,
            score_outcome: outcome,
            representative_published_at: representative.and_then(|a| a.published_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc(id: &str, score: f64, size: usize, hour: Option<u32>) -> RankedCluster {
        use chrono::TimeZone;
        RankedCluster {
            cluster: Cluster {
                id: id.into(),
                section: "s".into(),
                members: vec![],
                representative: String::new(),
                threshold: 0.35,
                size,
                keywords: vec![],
            },
            relevance_score: score,
            insight_boost: 0.0,
            final_score: score,
            rank: 0,
            score_outcome: ScoreOutcome::Scored,
            representative_published_at: hour.map(|h| Utc.with_ymd_and_hms(2026, 3, 3, h, 0, 0).unwrap()),
        }
    }

    #[test]
    fn order_breaks_every_tie() {
        let mut v = vec![
            rc("d", 0.5, 1, None),
            rc("c", 0.5, 1, Some(3)),
            rc("b", 0.5, 2, Some(9)),
            rc("a", 0.9, 1, None),
            rc("e", 0.5, 1, None),
        ];
        v.sort_by(rank_order);
        let ids: Vec<_> = v.iter().map(|c| c.cluster.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn heuristic_stays_in_unit_range() {
        let cluster = Cluster {
            id: "s/a".into(),
            section: "s".into(),
            members: vec![],
            representative: String::new(),
            threshold: 0.35,
            size: 0,
            keywords: vec![],
        };
        let req = ScoreRequest {
            section: "s",
            cluster: &cluster,
            representative: None,
            members: vec![],
            now: Utc::now(),
        };
        let s = HeuristicScorer::default().compute(&req);
        assert!((0.0..=1.0).contains(&s));
        // trust 0.5, recency 0.5, diversity 0, preference 0.5
        assert!((s - (0.2 + 0.125 + 0.1)).abs() < 1e-9);
    }
}
