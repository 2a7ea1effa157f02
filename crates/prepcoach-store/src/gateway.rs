use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prepcoach_core::{
    encode_transcript, Credentials, Feedback, FeedbackSource, PrepcoachResult, Speaker,
    TranscriptTurn,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Columns of a conversation row that may be written by an upsert.
///
/// `None` fields are left out of the write, so an upsert never clears a
/// column another writer filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationFields {
    /// Practising user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Set when the call starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the call ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// JSON-encoded `[{role, content}]`, see [`encode_transcript`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Provider summary of the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_summary: Option<String>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_duration: Option<f64>,
}

impl ConversationFields {
    /// Copies every `Some` field of `other` over `self`.
    pub fn merge(&mut self, other: &ConversationFields) {
        let ConversationFields {
            user_id,
            start_time,
            end_time,
            transcript,
            analysis_summary,
            call_duration,
        } = other.clone();
        if user_id.is_some() {
            self.user_id = user_id;
        }
        if start_time.is_some() {
            self.start_time = start_time;
        }
        if end_time.is_some() {
            self.end_time = end_time;
        }
        if transcript.is_some() {
            self.transcript = transcript;
        }
        if analysis_summary.is_some() {
            self.analysis_summary = analysis_summary;
        }
        if call_duration.is_some() {
            self.call_duration = call_duration;
        }
    }
}

/// One row of the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Who said it.
    pub speaker: Speaker,
    /// Message text.
    pub message: String,
    /// Provider-side user id, when known.
    #[serde(rename = "elevenlabs_user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// When the message was captured.
    pub timestamp: DateTime<Utc>,
}

impl MessageLog {
    /// A row stamped now, without a user id.
    pub fn new(conversation_id: &str, speaker: Speaker, message: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            speaker,
            message: message.to_string(),
            user_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// One row of the feedback log.
///
/// Only the `feedback_logs` table columns are serialized; `source` and
/// `feedback_data` stay with in-process stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackLog {
    /// Conversation the feedback scores.
    pub conversation_id: String,
    /// Weighted overall score.
    pub overall_score: u8,
    /// PREP framework area score.
    pub prep_score: u8,
    /// Content area score.
    pub content_score: u8,
    /// Delivery area score.
    pub delivery_score: u8,
    /// Strategy that produced the feedback.
    #[serde(skip)]
    pub source: FeedbackSource,
    /// Raw model reply when the feedback came from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_notes: Option<String>,
    /// The full feedback.
    #[serde(skip)]
    pub feedback_data: Feedback,
    /// When the feedback was produced.
    pub timestamp: DateTime<Utc>,
}

impl FeedbackLog {
    /// A row for `feedback` stamped now.
    pub fn new(
        conversation_id: &str,
        feedback: &Feedback,
        source: FeedbackSource,
        notes: Option<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            overall_score: feedback.overall_score,
            prep_score: feedback.areas.prep_framework.score,
            content_score: feedback.areas.content.score,
            delivery_score: feedback.areas.delivery.score,
            source,
            feedback_notes: notes,
            feedback_data: feedback.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// A stored PREP score analysis, looked up by its human-readable feedback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepScoreRecord {
    /// Human-readable id the user looks the score up by.
    pub feedback_id: String,
    /// Conversation the score was computed from.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Score out of 100.
    pub prep_score: i64,
    /// Analysis date as stored.
    pub date: String,
    /// Call length in seconds.
    #[serde(default)]
    pub duration_seconds: i64,
    /// Analysis status, e.g. `completed`.
    pub status: String,
    /// Free-form data the analysis attached.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// The scored feedback as stored.
    #[serde(default)]
    pub feedback: Option<serde_json::Value>,
}

impl PrepScoreRecord {
    /// `metadata` and `feedback` are sometimes stored as JSON-encoded strings;
    /// decode them in place so callers always see structured values.
    pub fn decode_embedded_json(mut self) -> Self {
        for slot in [&mut self.metadata, &mut self.feedback] {
            if let Some(serde_json::Value::String(raw)) = slot.as_ref() {
                if let Ok(decoded) = serde_json::from_str::<serde_json::Value>(raw) {
                    *slot = Some(decoded);
                }
            }
        }
        self
    }
}

/// Normalizes a user-entered feedback id for lookup.
pub fn normalize_feedback_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Writes and reads against the hosted datastore, keyed by conversation id.
///
/// Implementations only provide the primitive operations; the de-duplicating
/// and transcript-recording flows are provided methods so every backend
/// behaves the same.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert-or-update the conversation row.
    async fn upsert_conversation(
        &self,
        conversation_id: &str,
        fields: &ConversationFields,
    ) -> PrepcoachResult<()>;

    /// Whether a conversation row exists.
    async fn conversation_exists(&self, conversation_id: &str) -> PrepcoachResult<bool>;

    /// Whether a log row with this exact text exists for the conversation.
    async fn message_logged(&self, conversation_id: &str, message: &str) -> PrepcoachResult<bool>;

    /// Unconditionally append a message-log row.
    async fn append_message_log(&self, log: &MessageLog) -> PrepcoachResult<()>;

    /// Append a feedback-log row.
    async fn insert_feedback_log(&self, log: &FeedbackLog) -> PrepcoachResult<()>;

    /// Fetch a stored PREP score analysis by feedback id.
    async fn lookup_prep_score(&self, feedback_id: &str) -> PrepcoachResult<Option<PrepScoreRecord>>;

    /// Check-then-insert: returns `true` if a row was written, `false` if the
    /// `(conversation_id, message)` pair was already logged.
    async fn insert_message_log(&self, log: &MessageLog) -> PrepcoachResult<bool> {
        if self.message_logged(&log.conversation_id, &log.message).await? {
            debug!(conversation_id = %log.conversation_id, "Message already logged, skipping");
            return Ok(false);
        }
        self.append_message_log(log).await?;
        Ok(true)
    }

    /// Stores a provider transcript: upserts the conversation row with the
    /// encoded transcript and `end_time`, then logs every turn.
    ///
    /// A failed upsert is returned as an error; failed turn logs are skipped
    /// with a warning.
    async fn record_transcript(
        &self,
        conversation_id: &str,
        turns: &[TranscriptTurn],
        extra: ConversationFields,
    ) -> PrepcoachResult<()> {
        let mut fields = extra;
        fields.transcript = Some(encode_transcript(turns)?);
        if fields.end_time.is_none() {
            fields.end_time = Some(Utc::now());
        }
        self.upsert_conversation(conversation_id, &fields).await?;

        for turn in turns {
            let mut log = MessageLog::new(conversation_id, Speaker::from_role(&turn.role), turn.text());
            log.user_id = fields.user_id.clone();
            if let Err(e) = self.insert_message_log(&log).await {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to log transcript turn");
            }
        }
        Ok(())
    }
}

/// Per-user credential rows in the datastore.
#[async_trait]
pub trait CredentialRecords: Send + Sync {
    /// The row for `user_identifier`, if any.
    async fn fetch_credentials(&self, user_identifier: &str) -> PrepcoachResult<Option<Credentials>>;

    /// Update the user's row if present, insert it otherwise.
    async fn store_credentials(
        &self,
        user_identifier: &str,
        credentials: &Credentials,
    ) -> PrepcoachResult<()>;
}
