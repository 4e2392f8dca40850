//! Provider-agnostic LLM completion client.
//!
//! Defines the [`LlmClient`] trait and two implementations: the Anthropic
//! messages API and the OpenAI chat-completions API. Both are single-attempt
//! callers — retry-on-transient-failure is deliberately left to a later run,
//! which reuses the analysis cache for everything that already succeeded.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_MAX_TOKENS: i64 = 4096;
const DEFAULT_TEMPERATURE: f64 = 0.3;
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// One completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Defaults to 4096 when zero.
    pub max_tokens: i64,
    /// Defaults to 0.3 when zero.
    pub temperature: f64,
}

/// One completion response with provider-reported metadata.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Model identifier echoed by the provider.
    pub model: String,
    /// Input + output tokens where reported separately, else total tokens.
    pub tokens_used: i64,
}

/// Interface implemented by all LLM providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Build the configured provider client.
pub fn create_client(provider: &str, api_key: &str, model: &str) -> Result<Box<dyn LlmClient>> {
    match provider {
        "anthropic" => Ok(Box::new(AnthropicClient::new(api_key, model)?)),
        "openai" => Ok(Box::new(OpenAiClient::new(api_key, model)?)),
        other => bail!("unsupported LLM provider: {}", other),
    }
}

fn effective_params(req: &CompletionRequest) -> (i64, f64) {
    let max_tokens = if req.max_tokens > 0 {
        req.max_tokens
    } else {
        DEFAULT_MAX_TOKENS
    };
    let temperature = if req.temperature > 0.0 {
        req.temperature
    } else {
        DEFAULT_TEMPERATURE
    };
    (max_tokens, temperature)
}

// ============ Anthropic ============

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(LLM_TIMEOUT).build()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let (max_tokens, temperature) = effective_params(req);

        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": req.user_prompt}],
        });
        if !req.system_prompt.is_empty() {
            body["system"] = json!(req.system_prompt);
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("anthropic API request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("anthropic API error {}: {}", status.as_u16(), truncate(&text, 400));
        }

        let json: Value = resp.json().await.context("parsing anthropic response")?;

        let content = json["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find_map(|b| b.get("text").and_then(Value::as_str))
            })
            .unwrap_or_default()
            .to_string();

        let model = json["model"].as_str().unwrap_or(&self.model).to_string();
        let tokens_used = json["usage"]["input_tokens"].as_i64().unwrap_or(0)
            + json["usage"]["output_tokens"].as_i64().unwrap_or(0);

        Ok(CompletionResponse {
            content,
            model,
            tokens_used,
        })
    }
}

// ============ OpenAI ============

/// Client for the OpenAI chat-completions API.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(LLM_TIMEOUT).build()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let (max_tokens, temperature) = effective_params(req);

        let mut messages = Vec::new();
        if !req.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": req.system_prompt}));
        }
        messages.push(json!({"role": "user", "content": req.user_prompt}));

        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": messages,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("openai API request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("openai API error {}: {}", status.as_u16(), truncate(&text, 400));
        }

        let json: Value = resp.json().await.context("parsing openai response")?;

        let content = json["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|c| c["message"]["content"].as_str())
            .map(str::to_string);

        let Some(content) = content else {
            bail!("openai API returned no choices");
        };

        let model = json["model"].as_str().unwrap_or(&self.model).to_string();
        let tokens_used = json["usage"]["total_tokens"].as_i64().unwrap_or(0);

        Ok(CompletionResponse {
            content,
            model,
            tokens_used,
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
