//! `prepcoach.toml` and its environment overrides.

use prepcoach_core::Credentials;
use prepcoach_feedback::{ConvaiConfig, ModelConfig, PollingPolicy};
use prepcoach_gateway::WebhookConfig;
use prepcoach_store::SupabaseConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PrepcoachConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Without a datastore, writes go to an in-process store and are lost on exit.
    #[serde(default)]
    pub datastore: Option<SupabaseConfig>,
    #[serde(default)]
    pub convai: ConvaiSection,
    #[serde(default)]
    pub analysis: ModelConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl Default for PrepcoachConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            webhook: WebhookConfig::default(),
            datastore: None,
            convai: ConvaiSection::default(),
            analysis: ModelConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Provider endpoint plus the last-resort credentials for the chain.
#[derive(Debug, Default, Deserialize)]
pub struct ConvaiSection {
    #[serde(flatten)]
    pub api: ConvaiConfig,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl ConvaiSection {
    pub fn fallback_credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.agent_id) {
            (Some(key), Some(agent)) => Some(Credentials::new(key.clone(), agent.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "PollingPolicy::transcript")]
    pub transcript: PollingPolicy,
    #[serde(default = "PollingPolicy::retry")]
    pub retry: PollingPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            transcript: PollingPolicy::transcript(),
            retry: PollingPolicy::retry(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}

impl PrepcoachConfig {
    /// Reads `path` if it exists, then applies environment overrides.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if tokio::fs::try_exists(path).await? {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
            })?;
            toml::from_str(&raw)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overrides file values with any of `WEBHOOK_SECRET`, `ANTHROPIC_API_KEY`,
    /// `SUPABASE_URL` + `SUPABASE_ANON_KEY`, `ELEVENLABS_API_KEY`,
    /// `ELEVENLABS_AGENT_ID`, `PORT`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(secret) = var("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.analysis.api_key = key;
        }
        if let (Some(url), Some(anon_key)) = (var("SUPABASE_URL"), var("SUPABASE_ANON_KEY")) {
            self.datastore = Some(SupabaseConfig { url, anon_key });
        }
        if let Some(key) = var("ELEVENLABS_API_KEY") {
            self.convai.api_key = Some(key);
        }
        if let Some(agent) = var("ELEVENLABS_AGENT_ID") {
            self.convai.agent_id = Some(agent);
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("local_storage.json")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: PrepcoachConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.webhook.tolerance_secs, 1800);
        assert_eq!(config.polling.transcript, PollingPolicy::transcript());
        assert_eq!(config.convai.api.api_base_url, "https://api.elevenlabs.io/v1");
        assert!(config.datastore.is_none());
        assert!(config.convai.fallback_credentials().is_none());
    }

    #[test]
    fn test_sections_parse() {
        let config: PrepcoachConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/prepcoach"

            [server]
            port = 8080

            [webhook]
            providers = ["elevenlabs", "staging"]

            [datastore]
            url = "https://demo.supabase.co"
            anon_key = "anon"

            [convai]
            api_base_url = "http://localhost:9000/v1"
            api_key = "xi"
            agent_id = "agent_1"

            [analysis]
            model_id = "claude-test"

            [polling.retry]
            max_attempts = 3
            initial_delay_ms = 100
            max_delay_ms = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.kv_path(), PathBuf::from("/var/lib/prepcoach/local_storage.json"));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.webhook.providers.len(), 2);
        assert_eq!(config.datastore.unwrap().anon_key, "anon");
        assert_eq!(config.convai.api.api_base_url, "http://localhost:9000/v1");
        assert_eq!(
            config.convai.fallback_credentials(),
            Some(Credentials::new("xi", "agent_1"))
        );
        assert_eq!(config.analysis.model_id, "claude-test");
        assert_eq!(config.analysis.max_tokens, 4000);
        assert_eq!(config.polling.retry.max_attempts, 3);
        assert_eq!(config.polling.transcript, PollingPolicy::transcript());
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("WEBHOOK_SECRET", "from-env"),
            ("ANTHROPIC_API_KEY", "sk-env"),
            ("SUPABASE_URL", "https://env.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon-env"),
            ("PORT", "4000"),
            ("ELEVENLABS_AGENT_ID", ""),
        ]
        .into_iter()
        .collect();

        let mut config: PrepcoachConfig =
            toml::from_str("[webhook]\nsecret = \"from-file\"").unwrap();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.webhook.secret.as_deref(), Some("from-env"));
        assert_eq!(config.analysis.api_key, "sk-env");
        assert_eq!(config.datastore.unwrap().url, "https://env.supabase.co");
        assert_eq!(config.server.port, 4000);
        assert!(config.convai.agent_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PrepcoachConfig::load(&tmp.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }
}
