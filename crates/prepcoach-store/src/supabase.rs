use crate::gateway::{
    normalize_feedback_id, ConversationFields, CredentialRecords, FeedbackLog, MessageLog,
    PersistenceGateway, PrepScoreRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use prepcoach_core::{Credentials, PrepcoachError, PrepcoachResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONVERSATIONS: &str = "conversations";
const CONVERSATION_LOGS: &str = "conversation_logs";
const FEEDBACK_LOGS: &str = "feedback_logs";
const PREP_SCORES: &str = "prep_score_analysis";
const USER_CREDENTIALS: &str = "user_credentials";

/// Credential rows are scoped to this service name.
pub const SERVICE_NAME: &str = "elevenlabs";

/// Connection settings for the hosted datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public (anon) API key.
    pub anon_key: String,
}

impl SupabaseConfig {
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url.trim_end_matches('/'), table)
    }
}

/// PostgREST-backed [`PersistenceGateway`] and [`CredentialRecords`].
pub struct SupabaseStore {
    config: SupabaseConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ConversationRow<'a> {
    conversation_id: &'a str,
    #[serde(flatten)]
    fields: &'a ConversationFields,
}

#[derive(Deserialize)]
struct IdRow {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct CredentialRow {
    api_key: String,
    agent_id: String,
}

impl SupabaseStore {
    /// A client for the REST endpoint in `config`.
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.config.table_url(table))
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
    }

    async fn send(&self, req: reqwest::RequestBuilder, table: &str) -> PrepcoachResult<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| PrepcoachError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PrepcoachError::Datastore(format!(
                "{table} request failed with {status}: {body}"
            )));
        }
        Ok(resp)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &[(&str, String)],
    ) -> PrepcoachResult<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![("select", columns.to_string())];
        query.extend(filters.iter().map(|(k, v)| (*k, format!("eq.{v}"))));
        query.push(("limit", "1".to_string()));

        let resp = self
            .send(self.request(reqwest::Method::GET, table).query(&query), table)
            .await?;
        resp.json()
            .await
            .map_err(|e| PrepcoachError::Datastore(format!("{table}: invalid response: {e}")))
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> PrepcoachResult<()> {
        let req = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(req, table).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SupabaseStore {
    async fn upsert_conversation(
        &self,
        conversation_id: &str,
        fields: &ConversationFields,
    ) -> PrepcoachResult<()> {
        let row = ConversationRow {
            conversation_id,
            fields,
        };
        let req = self
            .request(reqwest::Method::POST, CONVERSATIONS)
            .query(&[("on_conflict", "conversation_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);
        self.send(req, CONVERSATIONS).await?;
        debug!(conversation_id = %conversation_id, "Conversation upserted");
        Ok(())
    }

    async fn conversation_exists(&self, conversation_id: &str) -> PrepcoachResult<bool> {
        let rows: Vec<IdRow> = self
            .select(
                CONVERSATIONS,
                "id",
                &[("conversation_id", conversation_id.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn message_logged(&self, conversation_id: &str, message: &str) -> PrepcoachResult<bool> {
        let rows: Vec<IdRow> = self
            .select(
                CONVERSATION_LOGS,
                "id",
                &[
                    ("conversation_id", conversation_id.to_string()),
                    ("message", message.to_string()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn append_message_log(&self, log: &MessageLog) -> PrepcoachResult<()> {
        self.insert(CONVERSATION_LOGS, log).await
    }

    async fn insert_feedback_log(&self, log: &FeedbackLog) -> PrepcoachResult<()> {
        self.insert(FEEDBACK_LOGS, log).await
    }

    async fn lookup_prep_score(&self, feedback_id: &str) -> PrepcoachResult<Option<PrepScoreRecord>> {
        let rows: Vec<PrepScoreRecord> = self
            .select(
                PREP_SCORES,
                "*",
                &[("feedback_id", normalize_feedback_id(feedback_id))],
            )
            .await?;
        Ok(rows.into_iter().next().map(PrepScoreRecord::decode_embedded_json))
    }
}

#[async_trait]
impl CredentialRecords for SupabaseStore {
    async fn fetch_credentials(&self, user_identifier: &str) -> PrepcoachResult<Option<Credentials>> {
        let rows: Vec<CredentialRow> = self
            .select(
                USER_CREDENTIALS,
                "api_key,agent_id",
                &[
                    ("service_name", SERVICE_NAME.to_string()),
                    ("user_identifier", user_identifier.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| Credentials::new(row.api_key, row.agent_id)))
    }

    async fn store_credentials(
        &self,
        user_identifier: &str,
        credentials: &Credentials,
    ) -> PrepcoachResult<()> {
        let existing: Vec<IdRow> = self
            .select(
                USER_CREDENTIALS,
                "id",
                &[
                    ("service_name", SERVICE_NAME.to_string()),
                    ("user_identifier", user_identifier.to_string()),
                ],
            )
            .await?;

        match existing.into_iter().next() {
            Some(row) => {
                let id = match row.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                let req = self
                    .request(reqwest::Method::PATCH, USER_CREDENTIALS)
                    .query(&[("id", format!("eq.{id}"))])
                    .header("Prefer", "return=minimal")
                    .json(&serde_json::json!({
                        "api_key": credentials.api_key,
                        "agent_id": credentials.agent_id,
                        "updated_at": Utc::now(),
                    }));
                self.send(req, USER_CREDENTIALS).await?;
            }
            None => {
                self.insert(
                    USER_CREDENTIALS,
                    &serde_json::json!({
                        "api_key": credentials.api_key,
                        "agent_id": credentials.agent_id,
                        "service_name": SERVICE_NAME,
                        "user_identifier": user_identifier,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }
}
