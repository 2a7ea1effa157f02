//! Inbound webhook receiver for PrepCoach.
//!
//! Accepts the voice-agent provider's post-call webhooks, verifies their
//! HMAC signature and freshness, and stores the conversation transcript
//! through a [`PersistenceGateway`](prepcoach_store::PersistenceGateway).

/// The axum server and its routes.
pub mod server;
/// Request signature parsing and verification.
pub mod signature;
/// Webhook handler and transcript processing.
pub mod webhook;

pub use server::WebhookServer;
pub use signature::{check_request, compute_signature, SignatureError};
pub use webhook::{process_webhook_data, WebhookConfig, WebhookEvent, WebhookState};
