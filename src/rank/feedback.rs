//! Reader feedback (votes, follows, mutes) turned into a bounded ranking boost.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackCounts {
    pub upvotes: u32,
    pub downvotes: u32,
    pub follows: u32,
    pub mutes: u32,
}

impl FeedbackCounts {
    fn add(&mut self, other: FeedbackCounts) {
        self.upvotes = self.upvotes.saturating_add(other.upvotes);
        self.downvotes = self.downvotes.saturating_add(other.downvotes);
        self.follows = self.follows.saturating_add(other.follows);
        self.mutes = self.mutes.saturating_add(other.mutes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Upvote,
    Downvote,
    Follow,
    Mute,
}

/// What a piece of feedback is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKey {
    Topic(String),
    Source(String),
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKey::Topic(t) => write!(f, "topic:{t}"),
            TopicKey::Source(s) => write!(f, "source:{s}"),
        }
    }
}

#[async_trait::async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn counts_for(&self, key: &TopicKey) -> Result<FeedbackCounts, StoreError>;
}

/// Maps aggregated counts to an additive score boost.
pub trait InsightWeighting: Send + Sync {
    fn boost(&self, counts: &FeedbackCounts) -> f64;
}

/// `scale * (ln(1 + pos) - ln(1 + neg))`, clamped to `±max_abs`, where follows
/// and mutes count double.
#[derive(Debug, Clone, Copy)]
pub struct LogDampedWeighting {
    pub scale: f64,
    pub max_abs: f64,
}

impl Default for LogDampedWeighting {
    fn default() -> Self {
        Self {
            scale: 0.1,
            max_abs: 0.3,
        }
    }
}

impl InsightWeighting for LogDampedWeighting {
    fn boost(&self, c: &FeedbackCounts) -> f64 {
        let pos = c.upvotes as f64 + 2.0 * c.follows as f64;
        let neg = c.downvotes as f64 + 2.0 * c.mutes as f64;
        let raw = self.scale * (pos.ln_1p() - neg.ln_1p());
        raw.clamp(-self.max_abs, self.max_abs)
    }
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    counts: Mutex<HashMap<TopicKey, FeedbackCounts>>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: TopicKey, action: FeedbackAction) {
        let mut g = self.counts.lock();
        let c = g.entry(key).or_default();
        match action {
            FeedbackAction::Upvote => c.upvotes += 1,
            FeedbackAction::Downvote => c.downvotes += 1,
            FeedbackAction::Follow => c.follows += 1,
            FeedbackAction::Mute => c.mutes += 1,
        }
    }
}

#[async_trait::async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn counts_for(&self, key: &TopicKey) -> Result<FeedbackCounts, StoreError> {
        Ok(self.counts.lock().get(key).copied().unwrap_or_default())
    }
}

/// Store plus weighting: the one thing the ranker asks for a boost.
#[derive(Clone)]
pub struct FeedbackSignals {
    store: Arc<dyn FeedbackStore>,
    weighting: Arc<dyn InsightWeighting>,
}

impl FeedbackSignals {
    pub fn new(store: Arc<dyn FeedbackStore>, weighting: Arc<dyn InsightWeighting>) -> Self {
        Self { store, weighting }
    }

    /// No feedback at all; every boost is zero.
    pub fn none() -> Self {
        Self::new(
            Arc::new(MemoryFeedbackStore::new()),
            Arc::new(LogDampedWeighting::default()),
        )
    }

    /// Counts of all keys are summed before weighting. A failing lookup
    /// contributes nothing.
    pub async fn insight_boost_for(&self, keys: &[TopicKey]) -> f64 {
        let mut total = FeedbackCounts::default();
        for key in keys {
            match self.store.counts_for(key).await {
                Ok(c) => total.add(c),
                Err(e) => tracing::warn!(target: "rank", key = %key, error = %e, "feedback lookup failed"),
            }
        }
        let boost = self.weighting.boost(&total);
        if boost.is_finite() {
            boost
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_damped_is_monotone_and_bounded() {
        let w = LogDampedWeighting::default();
        let none = w.boost(&FeedbackCounts::default());
        let one_up = w.boost(&FeedbackCounts {
            upvotes: 1,
            ..Default::default()
        });
        let many_up = w.boost(&FeedbackCounts {
            upvotes: 10_000,
            follows: 10_000,
            ..Default::default()
        });
        let muted = w.boost(&FeedbackCounts {
            mutes: 1,
            ..Default::default()
        });
        assert_eq!(none, 0.0);
        assert!(one_up > none);
        assert!(many_up >= one_up);
        assert!(many_up <= 0.3);
        assert!(muted < 0.0);
    }

    #[test]
    fn topic_key_display() {
        assert_eq!(TopicKey::Topic("chips".into()).to_string(), "topic:chips");
        assert_eq!(TopicKey::Source("bbc".into()).to_string(), "source:bbc");
    }

    #[tokio::test]
    async fn boost_sums_keys() {
        let store = Arc::new(MemoryFeedbackStore::new());
        store.record(TopicKey::Topic("chips".into()), FeedbackAction::Follow);
        store.record(TopicKey::Source("bbc".into()), FeedbackAction::Upvote);
        let signals = FeedbackSignals::new(store, Arc::new(LogDampedWeighting::default()));
        let b = signals
            .insight_boost_for(&[TopicKey::Topic("chips".into()), TopicKey::Source("bbc".into())])
            .await;
        assert!((b - 0.1 * 4f64.ln()).abs() < 1e-9);
        assert_eq!(signals.insight_boost_for(&[]).await, 0.0);
    }
}
