use crate::webhook::{webhook_handler, WebhookState};
use axum::{
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use prepcoach_core::{PrepcoachError, PrepcoachResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The webhook receiver.
pub struct WebhookServer;

impl WebhookServer {
    /// Routes: `GET /`, `GET /health`, `POST /webhook/{provider}`.
    pub fn build(state: Arc<WebhookState>) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/webhook/{provider}", post(webhook_handler))
            .with_state(state)
    }

    /// Serves on an already bound listener until the task is dropped.
    pub async fn serve(listener: TcpListener, state: Arc<WebhookState>) -> PrepcoachResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, providers = ?state.config.providers, "Webhook server listening");
        axum::serve(listener, Self::build(state))
            .await
            .map_err(|e| PrepcoachError::Webhook(e.to_string()))
    }
}

async fn root_handler() -> &'static str {
    "ElevenLabs Webhook Server Running"
}

async fn health_handler() -> impl IntoResponse {
    serde_json::json!({"status": "ok", "service": "prepcoach-webhook"}).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::webhook::WebhookConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use prepcoach_store::MemoryStore;
    use tower::ServiceExt;

    fn app() -> Router {
        WebhookServer::build(Arc::new(WebhookState {
            config: WebhookConfig::default(),
            gateway: Arc::new(MemoryStore::new()),
        }))
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_banner() {
        let resp = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ElevenLabs Webhook Server Running");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_404() {
        let resp = app()
            .oneshot(
                Request::post("/webhook/acme")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_signature_is_401() {
        let resp = app()
            .oneshot(
                Request::post("/webhook/elevenlabs")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await, "Missing signature header");
    }
}
