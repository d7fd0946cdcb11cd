// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::llm::pricing::{ModelPrice, DEFAULT_MODEL};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_budget_usd() -> f64 {
    1.00
}
fn default_token_budget() -> u64 {
    100_000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_budget_path() -> String {
    "cache/budget.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "xai" (case-insensitive); both speak the chat-completions API.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY / XAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_budget_usd")]
    pub daily_budget_usd: f64,
    #[serde(default = "default_token_budget")]
    pub daily_token_budget: u64,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Score clusters with the model; otherwise the heuristic scorer is used.
    #[serde(default)]
    pub score_with_model: bool,
    #[serde(default = "default_budget_path")]
    pub budget_path: String,
    /// Extra or overriding per-model prices.
    #[serde(default)]
    pub prices: HashMap<String, ModelPrice>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: default_api_key(),
            daily_budget_usd: default_budget_usd(),
            daily_token_budget: default_token_budget(),
            request_timeout_ms: default_timeout_ms(),
            score_with_model: false,
            budget_path: default_budget_path(),
            prices: HashMap::new(),
        }
    }
}

impl LlmConfig {
    /// Env overrides: LLM_DAILY_BUDGET_USD, LLM_DAILY_TOKEN_BUDGET, LLM_MODEL.
    pub fn apply_env(&mut self) {
        if let Some(v) = env::var("LLM_DAILY_BUDGET_USD").ok().and_then(|s| s.trim().parse::<f64>().ok()) {
            self.daily_budget_usd = v;
        }
        if let Some(v) = env::var("LLM_DAILY_TOKEN_BUDGET").ok().and_then(|s| s.trim().parse::<u64>().ok()) {
            self.daily_token_budget = v;
        }
        if let Ok(m) = env::var("LLM_MODEL") {
            if !m.trim().is_empty() {
                self.model = m.trim().to_string();
            }
        }
    }

    /// Normalize provider, resolve "ENV" keys, and reset invalid numbers.
    pub fn sanitize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = match self.provider.as_str() {
                "xai" => "XAI_API_KEY",
                _ => "OPENAI_API_KEY",
            };
            self.api_key = env::var(var).unwrap_or_default();
        }
        if !self.daily_budget_usd.is_finite() || self.daily_budget_usd < 0.0 {
            tracing::warn!(value = self.daily_budget_usd, "invalid daily_budget_usd; using default");
            self.daily_budget_usd = default_budget_usd();
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = default_timeout_ms();
        }
    }

    pub fn endpoint(&self) -> &str {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) if !url.trim().is_empty() => url.trim_end_matches('/'),
            (_, "xai") => XAI_BASE_URL,
            _ => OPENAI_BASE_URL,
        }
    }
}
