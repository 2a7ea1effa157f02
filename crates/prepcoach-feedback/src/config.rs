use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which analysis model API to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Claude,
}

/// Settings for the secondary analysis model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API family.
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    /// Model name sent with every request.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Empty makes every completion fail with a configuration error.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider default, e.g. for a proxy.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reply length cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> LlmProvider {
    LlmProvider::Claude
}

fn default_model_id() -> String {
    "claude-3-7-sonnet-20250219".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    /// Configured base URL, else the provider default.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
            }
        }
    }
}

/// Backoff settings for one poll call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    /// Reads before giving up.
    pub max_attempts: u32,
    /// Wait before the first read.
    pub initial_delay_ms: u64,
    /// Cap on the growing delay.
    pub max_delay_ms: u64,
}

impl PollingPolicy {
    /// First pass after a call: 6 attempts from 10 s, capped at 60 s.
    pub fn transcript() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_ms: 10_000,
            max_delay_ms: 60_000,
        }
    }

    /// Re-poll after the first pass missed: 10 attempts from 2 s, capped at 15 s.
    pub fn retry() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 2_000,
            max_delay_ms: 15_000,
        }
    }

    /// Delay before the first read.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// The delay after `current`: ×1.5, capped.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(1.5).min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Settings for the voice-agent provider's REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvaiConfig {
    /// Versioned API root, without a trailing slash.
    #[serde(default = "default_convai_base_url")]
    pub api_base_url: String,
}

fn default_convai_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}

impl Default for ConvaiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_convai_base_url(),
        }
    }
}
