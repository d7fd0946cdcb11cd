//! Gateway-backed implementations of the ranking and synthesis seams.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::budget::BudgetTracker;
use crate::error::GenerationError;
use crate::llm::{ChatMessage, ChatRequest, Gateway};
use crate::rank::{RelevanceScorer, ScoreRequest};
use crate::synthesize::{render_messages, Completion, Summarizer, SummaryRequest};

const SCORE_MAX_TOKENS: u32 = 8;
const SCORE_EXCERPT_CHARS: usize = 600;

/// First decimal number in a completion, e.g. "0.72" out of "Score: 0.72".
pub fn parse_score(text: &str) -> Option<f64> {
    static NUM: OnceCell<Regex> = OnceCell::new();
    let re = NUM.get_or_init(|| Regex::new(r"(?:^|[^\d.])(\d*\.?\d+)").unwrap());
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Asks the model for a single relevance number per cluster. Every call is
/// reserved against the daily budget first.
pub struct LlmRelevanceScorer {
    gateway: Arc<Gateway>,
    budget: Arc<BudgetTracker>,
}

impl LlmRelevanceScorer {
    pub fn new(gateway: Arc<Gateway>, budget: Arc<BudgetTracker>) -> Self {
        Self { gateway, budget }
    }

    fn request(req: &ScoreRequest<'_>) -> ChatRequest {
        let headline = req.representative.map(|a| a.title.as_str()).unwrap_or_default();
        let excerpt: String = req
            .representative
            .map(|a| a.clean_text.chars().take(SCORE_EXCERPT_CHARS).collect())
            .unwrap_or_default();
        let user = format!(
            "Section: {}\nHeadline: {}\nReports: {}\nKeywords: {}\n\n{}",
            req.section,
            headline,
            req.cluster.size,
            req.cluster.keywords.join(", "),
            excerpt
        );
        ChatRequest {
            purpose: format!("rank.{}", req.section),
            messages: vec![
                ChatMessage::system(
                    "Rate how important this story is for a daily news brief. \
                     Reply with a single number between 0 and 1.",
                ),
                ChatMessage::user(user),
            ],
            max_tokens: SCORE_MAX_TOKENS,
            temperature: 0.0,
        }
    }
}

#[async_trait::async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score(&self, req: &ScoreRequest<'_>) -> Result<f64, GenerationError> {
        if !self.gateway.is_enabled() {
            return Err(GenerationError::Disabled);
        }
        let chat = Self::request(req);
        let (usd, tokens) = self.gateway.upper_bound(&chat);
        let reservation = self.budget.reserve(usd, tokens)?;
        let resp = self.gateway.call(&chat).await?;
        let cost = self.gateway.price(resp.prompt_tokens, resp.completion_tokens);
        reservation.settle(cost, resp.prompt_tokens + resp.completion_tokens);
        parse_score(&resp.content)
            .map(|v| v.clamp(0.0, 1.0))
            .ok_or_else(|| GenerationError::Malformed(format!("no score in {:?}", resp.content)))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Section summaries through the gateway. Budget reservation is the
/// synthesizer's job; this only makes the call and prices it.
pub struct LlmSummarizer {
    gateway: Arc<Gateway>,
}

impl LlmSummarizer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, req: &SummaryRequest) -> Result<Completion, GenerationError> {
        let chat = ChatRequest {
            purpose: format!("synthesize.{}", req.section),
            messages: render_messages(req),
            max_tokens: req.max_tokens,
            temperature: 0.3,
        };
        let resp = self.gateway.call(&chat).await?;
        let tokens_used = resp.prompt_tokens + resp.completion_tokens;
        Ok(Completion {
            text: resp.content,
            prompt_tokens: resp.prompt_tokens,
            completion_tokens: resp.completion_tokens,
            tokens_used,
            cost_usd: self.gateway.price(resp.prompt_tokens, resp.completion_tokens),
        })
    }

    fn price(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.gateway.price(prompt_tokens, completion_tokens)
    }

    fn enabled(&self) -> bool {
        self.gateway.is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::pricing::Pricing;
    use crate::llm::MockProvider;
    use crate::model::Cluster;
    use chrono::{NaiveDate, Utc};
    use std::time::Duration;

    #[test]
    fn parses_first_number() {
        assert_eq!(parse_score("0.72"), Some(0.72));
        assert_eq!(parse_score("Score: .5 out of 1"), Some(0.5));
        assert_eq!(parse_score("1"), Some(1.0));
        assert_eq!(parse_score("none"), None);
    }

    fn cluster() -> Cluster {
        Cluster {
            id: "market/a".into(),
            section: "market".into(),
            members: vec!["a".into()],
            representative: "a".into(),
            threshold: 0.35,
            size: 1,
            keywords: vec!["oil".into()],
        }
    }

    #[tokio::test]
    async fn scorer_spends_from_budget() {
        let gw = Arc::new(Gateway::new(
            Arc::new(MockProvider::new("0.8")),
            Pricing::default(),
            Duration::from_secs(1),
        ));
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let budget = Arc::new(BudgetTracker::in_memory(1.0, 10_000, day));
        let scorer = LlmRelevanceScorer::new(gw, budget.clone());
        let c = cluster();
        let req = ScoreRequest {
            section: "market",
            cluster: &c,
            representative: None,
            members: vec![],
            now: Utc::now(),
        };
        let s = scorer.score(&req).await.unwrap();
        assert!((s - 0.8).abs() < 1e-9);
        assert!(budget.get_state().spent_tokens > 0);
    }

    #[tokio::test]
    async fn scorer_refused_when_budget_empty() {
        let gw = Arc::new(Gateway::new(
            Arc::new(MockProvider::new("0.8")),
            Pricing::default(),
            Duration::from_secs(1),
        ));
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let budget = Arc::new(BudgetTracker::in_memory(0.0, 0, day));
        let scorer = LlmRelevanceScorer::new(gw, budget.clone());
        let c = cluster();
        let req = ScoreRequest {
            section: "market",
            cluster: &c,
            representative: None,
            members: vec![],
            now: Utc::now(),
        };
        assert!(matches!(scorer.score(&req).await, Err(GenerationError::Budget(_))));
        assert_eq!(budget.get_state().spent_tokens, 0);
    }
}
