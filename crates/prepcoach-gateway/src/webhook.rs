use crate::signature::{check_request, DEFAULT_TOLERANCE_SECS};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use prepcoach_core::TranscriptTurn;
use prepcoach_store::{ConversationFields, PersistenceGateway};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Configuration for the inbound webhook endpoint.
#[derive(Deserialize, Clone, Debug)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Without one every request is refused with 500.
    #[serde(default)]
    pub secret: Option<String>,
    /// Accepted `{provider}` path segments: POST /webhook/{provider}
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    /// Maximum signature age in seconds.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
}

fn default_providers() -> Vec<String> {
    vec!["elevenlabs".to_string()]
}

fn default_tolerance_secs() -> i64 {
    DEFAULT_TOLERANCE_SECS
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            providers: default_providers(),
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

/// Shared state for the webhook handler.
pub struct WebhookState {
    /// Signature and routing settings.
    pub config: WebhookConfig,
    /// Where conversation rows are written.
    pub gateway: Arc<dyn PersistenceGateway>,
}

/// A post-call webhook body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    /// Event kind, e.g. `post_call_transcription`.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// Missing for malformed events.
    #[serde(default)]
    pub data: Option<WebhookData>,
}

/// Payload of a post-call event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    /// Provider conversation id; events without one are ignored.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Full transcript of the call.
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    /// Variables the client passed when starting the call.
    #[serde(default)]
    pub conversation_initiation_client_data: Option<ClientData>,
    /// Provider analysis, when it ran.
    #[serde(default)]
    pub analysis: Option<Analysis>,
    /// Call timing.
    #[serde(default)]
    pub metadata: Option<CallMetadata>,
}

/// Client data sent at call start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientData {
    /// Template variables for this call.
    #[serde(default)]
    pub dynamic_variables: Option<DynamicVariables>,
}

/// Per-call template variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DynamicVariables {
    /// Id of the practising user, when the client sent one.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Provider-side call analysis.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Analysis {
    /// One-paragraph summary.
    #[serde(default)]
    pub transcript_summary: Option<String>,
}

/// Call timing reported by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallMetadata {
    /// Length of the call in seconds.
    #[serde(default)]
    pub call_duration_secs: Option<f64>,
}

impl WebhookData {
    fn user_id(&self) -> Option<String> {
        self.conversation_initiation_client_data
            .as_ref()?
            .dynamic_variables
            .as_ref()?
            .user_id
            .clone()
    }
}

/// Stores the conversation and its turns. Returns `false` when the event
/// lacks a conversation id or transcript, or the conversation upsert fails.
pub async fn process_webhook_data(gateway: &dyn PersistenceGateway, event: &WebhookEvent) -> bool {
    let Some(data) = &event.data else {
        error!("Webhook event has no data");
        return false;
    };
    let Some(conversation_id) = data.conversation_id.as_deref().filter(|id| !id.is_empty()) else {
        error!("Webhook event has no conversation_id");
        return false;
    };
    if data.transcript.is_empty() {
        error!(conversation_id = %conversation_id, "Webhook event has no transcript");
        return false;
    }

    let extra = ConversationFields {
        user_id: data.user_id(),
        analysis_summary: data.analysis.as_ref().and_then(|a| a.transcript_summary.clone()),
        call_duration: data.metadata.as_ref().and_then(|m| m.call_duration_secs),
        ..Default::default()
    };

    match gateway
        .record_transcript(conversation_id, &data.transcript, extra)
        .await
    {
        Ok(()) => {
            info!(
                conversation_id = %conversation_id,
                turns = data.transcript.len(),
                "Stored webhook transcript"
            );
            true
        }
        Err(e) => {
            error!(conversation_id = %conversation_id, error = %e, "Failed to store webhook transcript");
            false
        }
    }
}

/// Axum handler for incoming webhook POST requests.
///
/// Route: `POST /webhook/{provider}`
///
/// The raw body is verified against the signature header before it is
/// parsed; any failed check answers with its own status and nothing is
/// stored.
pub async fn webhook_handler(
    Path(provider): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<WebhookState>>,
    body: String,
) -> impl IntoResponse {
    if !state.config.providers.iter().any(|p| *p == provider) {
        warn!(provider = %provider, "Unknown webhook provider");
        return (StatusCode::NOT_FOUND, "Unknown webhook provider".to_string());
    }

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = check_request(
        &headers,
        &body,
        state.config.secret.as_deref(),
        now,
        state.config.tolerance_secs,
    ) {
        warn!(provider = %provider, error = %e, "Webhook rejected");
        return (e.status(), e.to_string());
    }

    let event: WebhookEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            error!(provider = %provider, error = %e, "Webhook body is not valid JSON");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    info!(
        provider = %provider,
        event_type = event.event_type.as_deref().unwrap_or("unknown"),
        "Received valid webhook"
    );

    if process_webhook_data(state.gateway.as_ref(), &event).await {
        (StatusCode::OK, "Webhook processed successfully".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to process webhook data".to_string(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use prepcoach_store::MemoryStore;
    use serde_json::json;

    fn event(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_process_stores_conversation_and_turns() {
        let store = MemoryStore::new();
        let ev = event(json!({
            "type": "post_call_transcription",
            "data": {
                "conversation_id": "conv_wh",
                "transcript": [
                    {"role": "agent", "message": "Welcome."},
                    {"role": "user", "message": "Let's talk price."}
                ],
                "conversation_initiation_client_data": {"dynamic_variables": {"user_id": "u_42"}},
                "analysis": {"transcript_summary": "Price talk."},
                "metadata": {"call_duration_secs": 93}
            }
        }));

        assert!(process_webhook_data(&store, &ev).await);

        let row = store.conversation("conv_wh").unwrap();
        assert_eq!(row.user_id.as_deref(), Some("u_42"));
        assert_eq!(row.analysis_summary.as_deref(), Some("Price talk."));
        assert_eq!(row.call_duration, Some(93.0));
        assert!(row.end_time.is_some());
        assert_eq!(
            row.transcript.as_deref(),
            Some(r#"[{"role":"assistant","content":"Welcome."},{"role":"user","content":"Let's talk price."}]"#)
        );

        let logs = store.message_logs("conv_wh");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].user_id.as_deref(), Some("u_42"));
    }

    #[tokio::test]
    async fn test_redelivery_does_not_duplicate_logs() {
        let store = MemoryStore::new();
        let ev = event(json!({"data": {
            "conversation_id": "conv_wh",
            "transcript": [{"role": "user", "message": "Hello"}]
        }}));
        assert!(process_webhook_data(&store, &ev).await);
        assert!(process_webhook_data(&store, &ev).await);
        assert_eq!(store.message_logs("conv_wh").len(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_events_are_refused() {
        let store = MemoryStore::new();
        assert!(!process_webhook_data(&store, &event(json!({}))).await);
        assert!(!process_webhook_data(&store, &event(json!({"data": {"transcript": []}}))).await);
        assert!(
            !process_webhook_data(
                &store,
                &event(json!({"data": {"conversation_id": "conv_wh", "transcript": []}}))
            )
            .await
        );
        assert!(store.conversation("conv_wh").is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config: WebhookConfig = serde_json::from_str("{}").unwrap();
        assert!(config.secret.is_none());
        assert_eq!(config.providers, vec!["elevenlabs"]);
        assert_eq!(config.tolerance_secs, 1800);
    }
}
