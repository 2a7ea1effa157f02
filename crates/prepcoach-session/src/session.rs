use prepcoach_core::{Feedback, Message};
use serde::{Deserialize, Serialize};

/// Minimum number of messages before feedback may be generated.
pub const MIN_MESSAGES_FOR_FEEDBACK: usize = 3;

/// State of the conversation currently being practised.
///
/// Only the session tracker mutates this; everyone else reads snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Provider id, set on call start.
    pub conversation_id: Option<String>,
    /// Append-only, in arrival order.
    pub messages: Vec<Message>,
    /// Set on the first agent or user activity and never cleared mid-session.
    pub started: bool,
    /// Microphone open right now.
    pub mic_active: bool,
    /// Latest widget error, shown to the user.
    pub last_error: Option<String>,
    /// Feedback handed over by the agent's `triggerFeedback` tool, if any.
    pub agent_feedback: Option<Feedback>,
}

impl ConversationSession {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages captured so far.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// At least [`MIN_MESSAGES_FOR_FEEDBACK`] messages were captured.
    pub fn should_generate_feedback(&self) -> bool {
        self.messages.len() >= MIN_MESSAGES_FOR_FEEDBACK
    }

    /// `true` when the most recent message came from the agent.
    pub fn last_message_is_agent(&self) -> bool {
        self.messages.last().is_some_and(|m| !m.is_user)
    }

    /// The user's messages, in order.
    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_user)
    }
}
