//! Error taxonomy for the pipeline boundaries.
//!
//! None of these abort a run on their own: fetch errors are retried and then
//! health-tracked, generation errors fall back, budget refusals happen before a
//! call is issued. Startup and config plumbing keeps using `anyhow`.

use thiserror::Error;

/// Per-source failure while fetching or parsing a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("feed parse failed: {0}")]
    Parse(String),
    #[error("feed io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(0)
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Http(e.to_string())
        }
    }
}

/// Per-call failure of a scoring or summarization request.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation is disabled")]
    Disabled,
    #[error("generation request failed: {0}")]
    Http(String),
    #[error("generation provider returned status {0}")]
    Status(u16),
    #[error("generation timed out after {0} ms")]
    Timeout(u64),
    #[error("malformed generation response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout(0)
        } else if let Some(status) = e.status() {
            GenerationError::Status(status.as_u16())
        } else {
            GenerationError::Http(e.to_string())
        }
    }
}

/// Spend refused up front because it would cross a ceiling.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "budget exceeded: requested ${requested_usd:.6} / {requested_tokens} tokens, \
     remaining ${remaining_usd:.6} / {remaining_tokens} tokens"
)]
pub struct BudgetExceeded {
    pub requested_usd: f64,
    pub requested_tokens: u64,
    pub remaining_usd: f64,
    pub remaining_tokens: u64,
}

/// Failure reported by an external store (source repository, brief sink).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
