//! Core types and error definitions for PrepCoach.
//!
//! This crate provides the foundational types shared across all PrepCoach crates:
//! the unified error enum, conversation messages and transcripts, and the
//! PREP feedback structure produced by the feedback pipeline.
//!
//! # Main types
//!
//! - [`PrepcoachError`] — Unified error enum for all PrepCoach subsystems.
//! - [`PrepcoachResult`] — Convenience alias for `Result<T, PrepcoachError>`.
//! - [`Message`] — A single message captured during a live conversation.
//! - [`TranscriptTurn`] / [`ConversationRecord`] — The provider's stored view of a call.
//! - [`Feedback`] / [`FeedbackArea`] — A PREP performance score.
//! - [`FeedbackSource`] — Provenance tag of a [`Feedback`].
//! - [`Credentials`] — Voice-agent API key and agent id.

/// PREP feedback types.
pub mod feedback;
/// Conversation messages and provider transcripts.
pub mod message;

pub use feedback::{Feedback, FeedbackArea, FeedbackAreas, FeedbackSource};
pub use message::{encode_transcript, ConversationRecord, Message, Speaker, TranscriptTurn};

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for PrepCoach.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum PrepcoachError {
    /// An error from an outbound HTTP request (voice-agent API, LLM API).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error reported by the hosted datastore.
    #[error("Datastore error: {0}")]
    Datastore(String),

    /// An error related to conversation session state or durable storage.
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised while producing feedback.
    #[error("Feedback error: {0}")]
    Feedback(String),

    /// An error raised while handling an inbound webhook.
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`PrepcoachError`].
pub type PrepcoachResult<T> = Result<T, PrepcoachError>;

// --- Credentials ---

/// Credentials for the external voice-agent provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Provider API key.
    pub api_key: String,
    /// Identifier of the negotiation agent.
    pub agent_id: String,
}

impl Credentials {
    /// Creates a credentials pair.
    pub fn new(api_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Returns `true` when either value is blank.
    pub fn is_incomplete(&self) -> bool {
        self.api_key.trim().is_empty() || self.agent_id.trim().is_empty()
    }
}
