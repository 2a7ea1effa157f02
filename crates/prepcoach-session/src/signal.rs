//! Lifecycle signals and payload normalization.
//!
//! Widget payloads arrive in several shapes (bare strings, `{text}`,
//! `{message}`, `{response}`, `{transcript}`, or something else entirely).
//! Everything here turns them into plain values without ever failing.

use prepcoach_core::Feedback;
use serde_json::Value;

/// Placeholder for an agent payload no text could be extracted from.
pub const UNKNOWN_AGENT_MESSAGE: &str = "Agent message (format unknown)";
/// Placeholder for a user payload no text could be extracted from.
pub const UNKNOWN_USER_MESSAGE: &str = "User message (format unknown)";

/// Text handed back to the agent by the `triggerFeedback` client tool.
pub const FEEDBACK_TOOL_REPLY: &str = "Feedback generation triggered successfully.";
/// Text handed back to the agent by the `triggerName` client tool.
pub const NAME_TOOL_REPLY: &str = "Name trigger acknowledged.";
/// Text handed back to the agent by the `triggerStartNegotiation` client tool.
pub const START_TOOL_REPLY: &str = "Negotiation started successfully.";

/// A conversation lifecycle signal, decoupled from the widget that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleSignal {
    /// The widget finished loading.
    Ready,
    /// A call began; the payload carries the conversation id.
    CallStart(Value),
    /// The agent said something.
    AgentMessage(Value),
    /// The user said something.
    UserMessage(Value),
    /// The call ended.
    CallEnd(Value),
    /// The agent finished its turn.
    AgentStoppedSpeaking,
    /// Any click or keypress inside the widget.
    WidgetInteraction,
    /// `true` while the microphone is open.
    MicrophoneActivity(bool),
    /// The widget reported an error.
    Error(String),
    /// The agent invoked `triggerFeedback`.
    FeedbackToolCalled(Value),
    /// The agent invoked `triggerStartNegotiation`.
    StartNegotiation,
}

/// Which side authored a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    /// The voice agent.
    Agent,
    /// The practising user.
    User,
}

/// Extracts message text from a widget payload.
///
/// Priority: bare string, `.text`, `.message`, then `.response` for the agent
/// or `.transcript` for the user, then the JSON encoding of the payload, then
/// a fixed placeholder.
pub fn message_text(payload: &Value, author: Author) -> String {
    let role_field = match author {
        Author::Agent => "response",
        Author::User => "transcript",
    };

    let extracted = match payload {
        Value::String(s) => non_empty(s),
        Value::Object(map) => ["text", "message", role_field]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str).and_then(non_empty)),
        _ => None,
    };
    if let Some(text) = extracted {
        return text;
    }

    match payload {
        Value::Null => placeholder(author),
        Value::String(_) => placeholder(author),
        other => serde_json::to_string(other).unwrap_or_else(|_| placeholder(author)),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn placeholder(author: Author) -> String {
    match author {
        Author::Agent => UNKNOWN_AGENT_MESSAGE,
        Author::User => UNKNOWN_USER_MESSAGE,
    }
    .to_string()
}

/// Extracts the conversation id from a call-start payload:
/// `.conversationId`, `.detail.conversationId`, or a bare string longer than
/// five characters.
pub fn conversation_id(payload: &Value) -> Option<String> {
    let from_object = |v: &Value| {
        v.get("conversationId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match payload {
        Value::String(s) if s.chars().count() > 5 => Some(s.clone()),
        Value::Object(_) => {
            from_object(payload).or_else(|| payload.get("detail").and_then(from_object))
        }
        _ => None,
    }
}

/// Reads a microphone-activity payload: a bool, or an object with
/// `isActive`/`active`.
pub fn mic_active(payload: &Value) -> bool {
    match payload {
        Value::Bool(b) => *b,
        Value::Object(map) => ["isActive", "active"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_bool))
            .unwrap_or(false),
        _ => false,
    }
}

/// Renders an error payload as text.
pub fn error_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        Value::Null => "unknown widget error".to_string(),
        other => other.to_string(),
    }
}

/// Pulls agent-supplied feedback out of a `triggerFeedback` payload, either
/// the payload itself or its `.feedback` field. Only well-formed feedback is
/// accepted.
pub fn agent_feedback(payload: &Value) -> Option<Feedback> {
    [payload.get("feedback"), Some(payload)]
        .into_iter()
        .flatten()
        .find_map(|v| serde_json::from_value::<Feedback>(v.clone()).ok())
        .filter(Feedback::is_well_formed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_text_priority() {
        assert_eq!(message_text(&json!("Hello"), Author::Agent), "Hello");
        assert_eq!(
            message_text(&json!({"text": "a", "message": "b"}), Author::Agent),
            "a"
        );
        assert_eq!(message_text(&json!({"message": "b"}), Author::User), "b");
        assert_eq!(message_text(&json!({"response": "r"}), Author::Agent), "r");
        assert_eq!(
            message_text(&json!({"transcript": "t"}), Author::User),
            "t"
        );
    }

    #[test]
    fn test_role_specific_field_is_not_shared() {
        // `.response` only counts for the agent; the user falls back to JSON.
        assert_eq!(
            message_text(&json!({"response": "r"}), Author::User),
            r#"{"response":"r"}"#
        );
    }

    #[test]
    fn test_message_text_placeholders() {
        assert_eq!(message_text(&Value::Null, Author::Agent), UNKNOWN_AGENT_MESSAGE);
        assert_eq!(message_text(&json!(""), Author::User), UNKNOWN_USER_MESSAGE);
        assert_eq!(message_text(&json!(42), Author::User), "42");
    }

    #[test]
    fn test_conversation_id_shapes() {
        assert_eq!(
            conversation_id(&json!({"conversationId": "conv_123"})).as_deref(),
            Some("conv_123")
        );
        assert_eq!(
            conversation_id(&json!({"detail": {"conversationId": "conv_456"}})).as_deref(),
            Some("conv_456")
        );
        assert_eq!(conversation_id(&json!("conv_789")).as_deref(), Some("conv_789"));
        assert_eq!(conversation_id(&json!("short")), None);
        assert_eq!(conversation_id(&json!({"other": 1})), None);
    }

    #[test]
    fn test_mic_and_error_payloads() {
        assert!(mic_active(&json!(true)));
        assert!(mic_active(&json!({"isActive": true})));
        assert!(!mic_active(&json!({})));
        assert_eq!(error_text(&json!({"message": "socket closed"})), "socket closed");
        assert_eq!(error_text(&json!("boom")), "boom");
    }

    #[test]
    fn test_agent_feedback_extraction() {
        let area = json!({"score": 80, "strengths": ["s"], "improvements": ["i"]});
        let feedback = json!({
            "overallScore": 80,
            "areas": {"prepFramework": area, "content": area, "delivery": area}
        });
        assert!(agent_feedback(&json!({ "feedback": feedback })).is_some());
        assert!(agent_feedback(&feedback).is_some());
        assert!(agent_feedback(&json!({"note": "done"})).is_none());

        let empty = json!({"score": 80, "strengths": [], "improvements": ["i"]});
        let malformed = json!({
            "overallScore": 80,
            "areas": {"prepFramework": empty, "content": area, "delivery": area}
        });
        assert!(agent_feedback(&malformed).is_none());
    }
}
