use crate::gateway::{
    normalize_feedback_id, ConversationFields, CredentialRecords, FeedbackLog, MessageLog,
    PersistenceGateway, PrepScoreRecord,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use prepcoach_core::{Credentials, PrepcoachResult};
use std::collections::HashMap;

#[derive(Default)]
struct Tables {
    conversations: HashMap<String, ConversationFields>,
    message_logs: Vec<MessageLog>,
    feedback_logs: Vec<FeedbackLog>,
    prep_scores: HashMap<String, PrepScoreRecord>,
    credentials: HashMap<String, Credentials>,
}

/// In-process datastore. Used when no hosted datastore is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a conversation row.
    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationFields> {
        self.tables.read().conversations.get(conversation_id).cloned()
    }

    /// All message-log rows for a conversation, in insertion order.
    pub fn message_logs(&self, conversation_id: &str) -> Vec<MessageLog> {
        self.tables
            .read()
            .message_logs
            .iter()
            .filter(|l| l.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// All feedback-log rows, in insertion order.
    pub fn feedback_logs(&self) -> Vec<FeedbackLog> {
        self.tables.read().feedback_logs.clone()
    }

    /// Seeds a PREP score analysis row.
    pub fn put_prep_score(&self, record: PrepScoreRecord) {
        self.tables
            .write()
            .prep_scores
            .insert(normalize_feedback_id(&record.feedback_id), record);
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn upsert_conversation(
        &self,
        conversation_id: &str,
        fields: &ConversationFields,
    ) -> PrepcoachResult<()> {
        self.tables
            .write()
            .conversations
            .entry(conversation_id.to_string())
            .or_default()
            .merge(fields);
        Ok(())
    }

    async fn conversation_exists(&self, conversation_id: &str) -> PrepcoachResult<bool> {
        Ok(self.tables.read().conversations.contains_key(conversation_id))
    }

    async fn message_logged(&self, conversation_id: &str, message: &str) -> PrepcoachResult<bool> {
        Ok(self
            .tables
            .read()
            .message_logs
            .iter()
            .any(|l| l.conversation_id == conversation_id && l.message == message))
    }

    async fn append_message_log(&self, log: &MessageLog) -> PrepcoachResult<()> {
        self.tables.write().message_logs.push(log.clone());
        Ok(())
    }

    async fn insert_feedback_log(&self, log: &FeedbackLog) -> PrepcoachResult<()> {
        self.tables.write().feedback_logs.push(log.clone());
        Ok(())
    }

    async fn lookup_prep_score(&self, feedback_id: &str) -> PrepcoachResult<Option<PrepScoreRecord>> {
        Ok(self
            .tables
            .read()
            .prep_scores
            .get(&normalize_feedback_id(feedback_id))
            .cloned()
            .map(PrepScoreRecord::decode_embedded_json))
    }
}

#[async_trait]
impl CredentialRecords for MemoryStore {
    async fn fetch_credentials(&self, user_identifier: &str) -> PrepcoachResult<Option<Credentials>> {
        Ok(self.tables.read().credentials.get(user_identifier).cloned())
    }

    async fn store_credentials(
        &self,
        user_identifier: &str,
        credentials: &Credentials,
    ) -> PrepcoachResult<()> {
        self.tables
            .write()
            .credentials
            .insert(user_identifier.to_string(), credentials.clone());
        Ok(())
    }
}
