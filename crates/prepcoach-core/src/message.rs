use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a logged line of conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human practising the negotiation.
    User,
    /// The voice agent, as reported live by the widget.
    Agent,
    /// The voice agent, as reported by the provider's stored transcript.
    Assistant,
}

impl Speaker {
    /// Maps a provider transcript role onto a speaker; anything that is not
    /// `user` is the assistant.
    pub fn from_role(role: &str) -> Self {
        if role == "user" {
            Speaker::User
        } else {
            Speaker::Assistant
        }
    }

    /// The label stored in the datastore.
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Agent => "agent",
            Speaker::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message captured during a live conversation.
///
/// Messages are immutable once appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The normalized textual content.
    pub text: String,
    /// `true` when the user authored the message.
    pub is_user: bool,
    /// UTC timestamp of when the message was appended.
    pub timestamp: DateTime<Utc>,
    /// Set only on the very first agent message of a session.
    #[serde(default)]
    pub is_initial_message: bool,
}

impl Message {
    /// Creates a user-authored message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, true, false)
    }

    /// Creates an agent-authored message.
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(text, false, false)
    }

    /// Creates the opening agent message of a session.
    pub fn initial_agent(text: impl Into<String>) -> Self {
        Self::new(text, false, true)
    }

    fn new(text: impl Into<String>, is_user: bool, is_initial_message: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user,
            timestamp: Utc::now(),
            is_initial_message,
        }
    }

    /// The speaker label used when this message is logged live.
    pub fn speaker(&self) -> Speaker {
        if self.is_user {
            Speaker::User
        } else {
            Speaker::Agent
        }
    }
}

/// One turn of a transcript as returned by the voice-agent provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// `user` or `agent` (anything else is treated as the agent).
    pub role: String,
    /// Spoken text; absent for tool-call turns.
    #[serde(default)]
    pub message: Option<String>,
}

impl TranscriptTurn {
    /// Creates a turn with the given role and text.
    pub fn new(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            message: Some(message.into()),
        }
    }

    /// Converts a live message into a transcript turn.
    pub fn from_message(message: &Message) -> Self {
        let role = if message.is_user { "user" } else { "agent" };
        Self::new(role, message.text.clone())
    }

    /// Whether the user spoke this turn.
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    /// The spoken text, or an empty string.
    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// The provider's stored record of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Provider-assigned conversation id.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Provider processing status (e.g. `processing`, `done`).
    #[serde(default)]
    pub status: Option<String>,
    /// Ordered transcript turns; empty while the provider is still processing.
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    /// Remaining fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConversationRecord {
    /// A record is usable only once its transcript is non-empty.
    pub fn has_transcript(&self) -> bool {
        !self.transcript.is_empty()
    }
}

#[derive(Serialize)]
struct StoredTurn<'a> {
    role: &'static str,
    content: &'a str,
}

/// Encodes a transcript the way it is stored on the conversation row:
/// a JSON array of `{role, content}` with role `user` or `assistant`.
pub fn encode_transcript(turns: &[TranscriptTurn]) -> serde_json::Result<String> {
    let stored: Vec<StoredTurn<'_>> = turns
        .iter()
        .map(|t| StoredTurn {
            role: Speaker::from_role(&t.role).as_str(),
            content: t.text(),
        })
        .collect();
    serde_json::to_string(&stored)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_from_role() {
        assert_eq!(Speaker::from_role("user"), Speaker::User);
        assert_eq!(Speaker::from_role("agent"), Speaker::Assistant);
        assert_eq!(Speaker::from_role("tool"), Speaker::Assistant);
    }

    #[test]
    fn test_encode_transcript_maps_roles() {
        let turns = vec![
            TranscriptTurn::new("agent", "Welcome."),
            TranscriptTurn::new("user", "Hi."),
        ];
        let json = encode_transcript(&turns).unwrap();
        assert_eq!(
            json,
            r#"[{"role":"assistant","content":"Welcome."},{"role":"user","content":"Hi."}]"#
        );
    }

    #[test]
    fn test_record_without_transcript_is_not_ready() {
        let record: ConversationRecord =
            serde_json::from_str(r#"{"conversation_id":"c1","status":"processing"}"#).unwrap();
        assert!(!record.has_transcript());
        assert_eq!(record.status.as_deref(), Some("processing"));
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let record: ConversationRecord = serde_json::from_str(
            r#"{"conversation_id":"c1","transcript":[{"role":"user","message":null}],"metadata":{"call_duration_secs":42}}"#,
        )
        .unwrap();
        assert!(record.has_transcript());
        assert_eq!(record.transcript[0].text(), "");
        assert_eq!(record.extra["metadata"]["call_duration_secs"], 42);
    }

    #[test]
    fn test_initial_message_flag() {
        let first = Message::initial_agent("Hello, I'm the procurement lead.");
        assert!(first.is_initial_message);
        assert_eq!(first.speaker(), Speaker::Agent);
        assert!(!Message::user("hi").is_initial_message);
    }
}
