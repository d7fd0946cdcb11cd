//! Generation gateway: provider abstraction, pricing, timeouts.
//!
//! Budget accounting is not done here. Callers reserve on the
//! [`BudgetTracker`](crate::budget::BudgetTracker) before a call and settle
//! with [`Gateway::price`] afterwards.

pub mod adapters;
pub mod openai;
pub mod pricing;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::llm::LlmConfig;
use crate::error::GenerationError;
use pricing::Pricing;

const MAX_COMPLETION_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Free-form label for logs ("rank.score", "synthesize.market").
    pub purpose: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn prompt_bytes(&self) -> u64 {
        self.messages.iter().map(|m| m.content.len() as u64).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GenerationError>;
    fn name(&self) -> &'static str;
    fn model(&self) -> &str;
}

/// Rough token count used for admission: one token per four bytes, rounded up.
pub fn approx_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Drop control characters (newlines kept), collapse runs of blank lines, cap length.
pub fn sanitize_completion(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_COMPLETION_CHARS));
    let mut newlines = 0;
    let mut kept = 0;
    for ch in input.chars() {
        let c = match ch {
            '\r' => continue,
            '\t' => ' ',
            '\n' => '\n',
            c if c.is_control() => continue,
            c => c,
        };
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
        kept += 1;
        if kept >= MAX_COMPLETION_CHARS {
            break;
        }
    }
    out.trim().to_string()
}

/// Returns canned text; token counts are estimated from the request.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub reply: String,
    pub model: String,
}

impl MockProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            model: "mock".into(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("Summary unavailable in mock mode; see the linked stories.")
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GenerationError> {
        let prompt: String = req.messages.iter().map(|m| m.content.as_str()).collect();
        Ok(ChatResponse {
            content: self.reply.clone(),
            prompt_tokens: approx_tokens(&prompt),
            completion_tokens: approx_tokens(&self.reply).min(req.max_tokens as u64),
            model: self.model.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Always fails with [`GenerationError::Disabled`]; used when generation is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProvider;

#[async_trait::async_trait]
impl Provider for DisabledProvider {
    async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, GenerationError> {
        Err(GenerationError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn model(&self) -> &str {
        "none"
    }
}

pub struct Gateway {
    provider: Arc<dyn Provider>,
    pricing: Pricing,
    timeout: Duration,
}

impl Gateway {
    pub fn new(provider: Arc<dyn Provider>, pricing: Pricing, timeout: Duration) -> Self {
        Self {
            provider,
            pricing,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.name() != "disabled"
    }

    /// USD cost of a call on the configured model.
    pub fn price(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.pricing.cost_usd(self.provider.model(), prompt_tokens, completion_tokens)
    }

    /// Worst-case `(usd, tokens)` for `req`: a token is at least one byte, and
    /// the completion is bounded by `max_tokens`.
    pub fn upper_bound(&self, req: &ChatRequest) -> (f64, u64) {
        let prompt = req.prompt_bytes();
        let completion = req.max_tokens as u64;
        (self.price(prompt, completion), prompt + completion)
    }

    pub async fn call(&self, req: &ChatRequest) -> Result<ChatResponse, GenerationError> {
        let t0 = std::time::Instant::now();
        let mut resp = match tokio::time::timeout(self.timeout, self.provider.complete(req)).await {
            Ok(r) => r?,
            Err(_) => return Err(GenerationError::Timeout(self.timeout.as_millis() as u64)),
        };
        resp.content = sanitize_completion(&resp.content);
        if resp.content.is_empty() {
            return Err(GenerationError::Malformed("empty completion".into()));
        }
        tracing::info!(
            target: "llm",
            purpose = %req.purpose,
            provider = self.provider.name(),
            model = %resp.model,
            prompt_tokens = resp.prompt_tokens,
            completion_tokens = resp.completion_tokens,
            latency_ms = t0.elapsed().as_millis() as u64,
            "generation call"
        );
        Ok(resp)
    }
}

/// Factory: build a provider according to config and environment variables.
///
/// * If `LLM_TEST_MODE=mock`, returns a deterministic mock provider.
/// * Else if generation is disabled or no key is available, returns [`DisabledProvider`].
/// * Else an OpenAI-compatible HTTP provider.
pub fn build_provider(cfg: &LlmConfig) -> Arc<dyn Provider> {
    if std::env::var("LLM_TEST_MODE")
        .map(|v| v.trim().eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
    {
        return Arc::new(MockProvider::default());
    }
    if !cfg.enabled {
        return Arc::new(DisabledProvider);
    }
    if cfg.api_key.trim().is_empty() {
        tracing::warn!(provider = %cfg.provider, "generation enabled but no api key; disabled");
        return Arc::new(DisabledProvider);
    }
    match openai::OpenAiProvider::new(
        cfg.endpoint(),
        &cfg.api_key,
        &cfg.model,
        cfg.provider == "xai",
        Duration::from_millis(cfg.request_timeout_ms),
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::warn!(error = %e, "could not build http provider; generation disabled");
            Arc::new(DisabledProvider)
        }
    }
}
