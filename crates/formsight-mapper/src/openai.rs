//! OpenAI-compatible chat completions transport

use crate::model::{ExtractionModel, ModelReply, PrimaryRequest, SpecialistRequest};
use crate::prompt::{render_primary, render_specialist};
use async_trait::async_trait;
use formsight_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Hosted model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    #[serde(default = "default_specialist_model")]
    pub specialist_model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_primary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_specialist_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            primary_model: default_primary_model(),
            specialist_model: default_specialist_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    /// API key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Two-tier model client over `/chat/completions`
pub struct OpenAiModel {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
    name: String,
}

impl OpenAiModel {
    pub fn new(config: ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        // per-attempt timeouts are enforced by the retry layer
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let name = format!("{}+{}", config.primary_model, config.specialist_model);
        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
            name,
        })
    }

    async fn complete(&self, model: &str, system: &str, user: String) -> Result<ModelReply> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        debug!(model, "sending chat completion");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        parse_completion(&text)
    }
}

#[async_trait]
impl ExtractionModel for OpenAiModel {
    async fn extract_primary(&self, request: &PrimaryRequest) -> Result<ModelReply> {
        self.complete(
            &self.config.primary_model,
            &request.instructions,
            render_primary(request),
        )
        .await
    }

    async fn extract_specialist(&self, request: &SpecialistRequest) -> Result<ModelReply> {
        self.complete(
            &self.config.specialist_model,
            &request.instructions,
            render_specialist(request),
        )
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else if err.is_connect() || err.is_request() {
        Error::transient(format!("model request failed: {}", err))
    } else {
        Error::service(format!("model request failed: {}", err))
    }
}

/// Rate limits and server errors are retryable; other statuses are not
pub fn classify_status(status: u16, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    match status {
        408 | 429 | 500..=599 => Error::transient(format!("model service returned {}: {}", status, snippet)),
        _ => Error::service(format!("model service returned {}: {}", status, snippet)),
    }
}

/// Pull the assistant message and token usage out of a completion body
pub fn parse_completion(body: &str) -> Result<ModelReply> {
    let value: Value = serde_json::from_str(body)?;
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::service("completion has no message content"))?;

    Ok(ModelReply {
        content: content.to_string(),
        total_tokens: value.pointer("/usage/total_tokens").and_then(Value::as_u64),
    })
}
