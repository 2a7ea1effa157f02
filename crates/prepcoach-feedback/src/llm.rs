use crate::config::ModelConfig;
use async_trait::async_trait;
use prepcoach_core::{PrepcoachError, PrepcoachResult};
use serde::Serialize;

/// A text-in, text-out model call.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Sends `prompt` as a single user turn and returns the reply text.
    async fn complete(&self, prompt: &str) -> PrepcoachResult<String>;
}

/// Anthropic Messages API client.
pub struct ClaudeCompletion {
    config: ModelConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl ClaudeCompletion {
    /// A client for the model named in `config`.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextCompletion for ClaudeCompletion {
    async fn complete(&self, prompt: &str) -> PrepcoachResult<String> {
        if self.config.api_key.is_empty() {
            return Err(PrepcoachError::Config("analysis model API key is not set".into()));
        }

        let url = format!("{}/v1/messages", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [ClaudeMessage { role: "user", content: prompt }],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PrepcoachError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PrepcoachError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(PrepcoachError::Http(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        extract_text(&resp_body)
    }
}

/// Joins the text blocks of a Messages API response.
pub fn extract_text(body: &serde_json::Value) -> PrepcoachResult<String> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| PrepcoachError::Feedback("Missing content in Claude response".into()))?;

    let text: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();

    if text.is_empty() {
        return Err(PrepcoachError::Feedback("Claude response has no text".into()));
    }
    Ok(text.join("\n"))
}
