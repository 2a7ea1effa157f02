use crate::config::ConvaiConfig;
use async_trait::async_trait;
use prepcoach_core::{ConversationRecord, PrepcoachError, PrepcoachResult};
use serde::Deserialize;

/// Read access to conversations stored by the voice-agent provider.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Fetches one conversation with its transcript so far.
    async fn get_conversation(&self, conversation_id: &str) -> PrepcoachResult<ConversationRecord>;
}

/// REST client for the conversational AI endpoints of the provider.
pub struct ConvaiClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ConversationList {
    #[serde(default)]
    conversations: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct SignedUrl {
    signed_url: String,
}

impl ConvaiClient {
    /// A client authenticating with `api_key`.
    pub fn new(config: &ConvaiConfig, api_key: impl Into<String>) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> PrepcoachResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| PrepcoachError::Config(format!("invalid voice-agent API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| PrepcoachError::Config("voice-agent API URL cannot take a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> PrepcoachResult<T> {
        if self.api_key.is_empty() {
            return Err(PrepcoachError::Config("voice-agent API key is not set".into()));
        }

        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let resp = self
            .http
            .get(url)
            .query(query)
            .header("xi-api-key", &self.api_key)
            .header("content-type", "application/json")
            .send()
            .await
            .map_err(|e| PrepcoachError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PrepcoachError::Http(format!("{path} returned {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| PrepcoachError::Http(format!("{path}: invalid response body: {e}")))
    }

    /// Summaries of the agent's past conversations.
    pub async fn list_conversations(&self, agent_id: &str) -> PrepcoachResult<Vec<serde_json::Value>> {
        let list: ConversationList = self
            .get_json(&["convai", "conversations"], &[("agent_id", agent_id)])
            .await?;
        Ok(list.conversations)
    }

    /// A signed URL for opening a conversation with the agent.
    pub async fn signed_url(&self, agent_id: &str) -> PrepcoachResult<String> {
        let signed: SignedUrl = self
            .get_json(
                &["convai", "conversation", "get_signed_url"],
                &[("agent_id", agent_id)],
            )
            .await?;
        Ok(signed.signed_url)
    }
}

#[async_trait]
impl ConversationSource for ConvaiClient {
    async fn get_conversation(&self, conversation_id: &str) -> PrepcoachResult<ConversationRecord> {
        self.get_json(&["convai", "conversations", conversation_id], &[])
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ConvaiClient {
        ConvaiClient::new(
            &ConvaiConfig {
                api_base_url: server.uri(),
            },
            "xi_test",
        )
    }

    #[tokio::test]
    async fn test_get_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convai/conversations/conv_1"))
            .and(header("xi-api-key", "xi_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "conversation_id": "conv_1",
                "status": "done",
                "transcript": [
                    {"role": "agent", "message": "Hello"},
                    {"role": "user", "message": null}
                ],
                "metadata": {"call_duration_secs": 31}
            })))
            .mount(&server)
            .await;

        let record = client(&server).get_conversation("conv_1").await.unwrap();
        assert!(record.has_transcript());
        assert_eq!(record.transcript[1].text(), "");
        assert!(record.extra.contains_key("metadata"));
    }

    #[tokio::test]
    async fn test_not_found_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client(&server).get_conversation("conv_x").await.unwrap_err();
        assert!(matches!(err, PrepcoachError::Http(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_conversation_id_is_one_encoded_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convai/conversations/conv%2F..%2Fagents%20x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transcript": [{"role": "user", "message": "Hi"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = client(&server)
            .get_conversation("conv/../agents x")
            .await
            .unwrap();
        assert!(record.has_transcript());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ConvaiClient::new(
            &ConvaiConfig {
                api_base_url: "https://api.example.invalid/v1/".into(),
            },
            "xi_test",
        );
        let url = client.endpoint(&["convai", "conversations", "c 1"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.invalid/v1/convai/conversations/c%201"
        );
    }

    #[tokio::test]
    async fn test_list_and_signed_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convai/conversations"))
            .and(query_param("agent_id", "agent_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "conversations": [{"conversation_id": "a"}, {"conversation_id": "b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convai/conversation/get_signed_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signed_url": "wss://example.invalid/session"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.list_conversations("agent_1").await.unwrap().len(), 2);
        assert_eq!(
            client.signed_url("agent_1").await.unwrap(),
            "wss://example.invalid/session"
        );
    }
}
