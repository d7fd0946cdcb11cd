//! Chat-completions provider for OpenAI and OpenAI-compatible endpoints (xAI).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::llm::{approx_tokens, ChatMessage, ChatRequest, ChatResponse, Provider};

pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    /// xAI still expects `max_tokens`; OpenAI wants `max_completion_tokens`.
    legacy_max_tokens: bool,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        legacy_max_tokens: bool,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::ingest::rss::USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            legacy_max_tokens,
        })
    }
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GenerationError> {
        let body = Req {
            model: &self.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: self.legacy_max_tokens.then_some(req.max_tokens),
            max_completion_tokens: (!self.legacy_max_tokens).then_some(req.max_tokens),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::Status(status.as_u16()));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("no choices".into()))?;

        // Providers occasionally omit usage; estimate rather than record zero spend.
        let (prompt_tokens, completion_tokens) = match parsed.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => {
                let prompt: String = req.messages.iter().map(|m| m.content.as_str()).collect();
                (approx_tokens(&prompt), approx_tokens(&content))
            }
        };

        Ok(ChatResponse {
            content,
            prompt_tokens,
            completion_tokens,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn name(&self) -> &'static str {
        if self.legacy_max_tokens {
            "xai"
        } else {
            "openai"
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
