use async_trait::async_trait;
use prepcoach_core::{PrepcoachError, PrepcoachResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Key holding the id of the conversation currently being practised.
pub const CONVERSATION_ID_KEY: &str = "currentConversationId";
/// Key holding the per-install user identifier.
pub const USER_IDENTIFIER_KEY: &str = "speakup_user_identifier";
/// Key holding the locally mirrored provider API key.
pub const API_KEY_KEY: &str = "elevenlabs_api_key";
/// Key holding the locally mirrored agent id.
pub const AGENT_ID_KEY: &str = "elevenlabs_agent_id";

/// A durable string map that survives restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, if set.
    async fn get(&self, key: &str) -> PrepcoachResult<Option<String>>;
    /// Replaces any previous value.
    async fn set(&self, key: &str, value: &str) -> PrepcoachResult<()>;
    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> PrepcoachResult<()>;
}

/// Volatile implementation, for tests and session-only operation.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: parking_lot::RwLock<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> PrepcoachResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PrepcoachResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PrepcoachResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// JSON-file-backed store. The whole map is rewritten on every change,
/// which is fine for the handful of keys kept here.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens the store at `path`, loading existing entries if the file exists.
    pub async fn new(path: PathBuf) -> PrepcoachResult<Self> {
        let entries = if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data).map_err(|e| {
                    PrepcoachError::Session(format!("Failed to parse {}: {e}", path.display()))
                })?
            }
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Writes `entries` to a sibling temp file and renames it over the store
    /// file, so a reader never sees a half-written map.
    async fn flush(&self, entries: &BTreeMap<String, String>) -> PrepcoachResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> PrepcoachResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PrepcoachResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> PrepcoachResult<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("local.json");

        let store = FileKeyValueStore::new(path.clone()).await.unwrap();
        store.set(CONVERSATION_ID_KEY, "conv_abc").await.unwrap();
        drop(store);

        let reopened = FileKeyValueStore::new(path).await.unwrap();
        assert_eq!(
            reopened.get(CONVERSATION_ID_KEY).await.unwrap().as_deref(),
            Some("conv_abc")
        );
    }

    #[tokio::test]
    async fn test_file_store_remove() {
        let tmp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(tmp.path().join("local.json")).await.unwrap();
        store.set(API_KEY_KEY, "sk_1").await.unwrap();
        store.remove(API_KEY_KEY).await.unwrap();
        assert!(store.get(API_KEY_KEY).await.unwrap().is_none());
        // Removing a missing key is not an error.
        store.remove(API_KEY_KEY).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(tmp.path().join("local.json")).await.unwrap();
        store.set(CONVERSATION_ID_KEY, "conv_abc").await.unwrap();

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = dir.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["local.json"]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("state");
        let store = FileKeyValueStore::new(dir.join("local.json")).await.unwrap();
        store.set(CONVERSATION_ID_KEY, "conv_old").await.unwrap();

        tokio::fs::remove_dir_all(&dir).await.unwrap();
        assert!(store.set(CONVERSATION_ID_KEY, "conv_new").await.is_err());
        assert!(store.remove(CONVERSATION_ID_KEY).await.is_err());
        assert_eq!(
            store.get(CONVERSATION_ID_KEY).await.unwrap().as_deref(),
            Some("conv_old")
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("local.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let err = FileKeyValueStore::new(path).await.err().unwrap();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKeyValueStore::new();
        assert!(store.get(AGENT_ID_KEY).await.unwrap().is_none());
        store.set(AGENT_ID_KEY, "agent_9").await.unwrap();
        assert_eq!(store.get(AGENT_ID_KEY).await.unwrap().as_deref(), Some("agent_9"));
    }
}
