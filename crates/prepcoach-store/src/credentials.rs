use crate::gateway::CredentialRecords;
use crate::kv::{KeyValueStore, AGENT_ID_KEY, API_KEY_KEY, USER_IDENTIFIER_KEY};
use async_trait::async_trait;
use parking_lot::RwLock;
use prepcoach_core::{Credentials, PrepcoachError, PrepcoachResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of the shared row every new user is seeded from.
pub const SHARED_DEFAULT_IDENTIFIER: &str = "default";

/// One source of credentials in a [`CredentialsChain`].
#[async_trait]
pub trait CredentialTier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Credentials held by this tier, if complete.
    async fn get(&self) -> PrepcoachResult<Option<Credentials>>;

    /// Stores `credentials` in this tier.
    async fn put(&self, credentials: &Credentials) -> PrepcoachResult<()>;

    /// Whether hits from slower tiers (and explicit saves) are written here.
    fn accepts_fill(&self) -> bool {
        true
    }
}

/// Returns the per-install user identifier, creating one on first use.
pub async fn user_identifier(kv: &dyn KeyValueStore) -> PrepcoachResult<String> {
    if let Some(id) = kv.get(USER_IDENTIFIER_KEY).await? {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    kv.set(USER_IDENTIFIER_KEY, &id).await?;
    debug!(user_identifier = %id, "Created user identifier");
    Ok(id)
}

/// The durable local mirror.
pub struct LocalTier {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalTier {
    /// Reads and writes the mirror keys in `kv`.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl CredentialTier for LocalTier {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self) -> PrepcoachResult<Option<Credentials>> {
        let api_key = self.kv.get(API_KEY_KEY).await?;
        let agent_id = self.kv.get(AGENT_ID_KEY).await?;
        Ok(match (api_key, agent_id) {
            (Some(api_key), Some(agent_id)) => Some(Credentials { api_key, agent_id }),
            _ => None,
        })
    }

    async fn put(&self, credentials: &Credentials) -> PrepcoachResult<()> {
        self.kv.set(API_KEY_KEY, &credentials.api_key).await?;
        self.kv.set(AGENT_ID_KEY, &credentials.agent_id).await
    }
}

/// The datastore row owned by this install's user identifier.
pub struct UserRecordTier {
    records: Arc<dyn CredentialRecords>,
    kv: Arc<dyn KeyValueStore>,
}

impl UserRecordTier {
    /// Looks up the row named by the locally stored user id.
    pub fn new(records: Arc<dyn CredentialRecords>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { records, kv }
    }
}

#[async_trait]
impl CredentialTier for UserRecordTier {
    fn name(&self) -> &'static str {
        "user_record"
    }

    async fn get(&self) -> PrepcoachResult<Option<Credentials>> {
        let user = user_identifier(self.kv.as_ref()).await?;
        self.records.fetch_credentials(&user).await
    }

    async fn put(&self, credentials: &Credentials) -> PrepcoachResult<()> {
        let user = user_identifier(self.kv.as_ref()).await?;
        self.records.store_credentials(&user, credentials).await
    }
}

/// The shared `default` datastore row. Read-only from the chain's point of view.
pub struct SharedDefaultTier {
    records: Arc<dyn CredentialRecords>,
}

impl SharedDefaultTier {
    /// Reads the shared default row.
    pub fn new(records: Arc<dyn CredentialRecords>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CredentialTier for SharedDefaultTier {
    fn name(&self) -> &'static str {
        "shared_default"
    }

    async fn get(&self) -> PrepcoachResult<Option<Credentials>> {
        self.records.fetch_credentials(SHARED_DEFAULT_IDENTIFIER).await
    }

    async fn put(&self, _credentials: &Credentials) -> PrepcoachResult<()> {
        Err(PrepcoachError::Config("shared default credentials are read-only".into()))
    }

    fn accepts_fill(&self) -> bool {
        false
    }
}

/// Credentials compiled in or set in configuration.
pub struct ConstantTier {
    credentials: Credentials,
}

impl ConstantTier {
    /// Always returns `credentials`.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialTier for ConstantTier {
    fn name(&self) -> &'static str {
        "constant"
    }

    async fn get(&self) -> PrepcoachResult<Option<Credentials>> {
        Ok(Some(self.credentials.clone()))
    }

    async fn put(&self, _credentials: &Credentials) -> PrepcoachResult<()> {
        Err(PrepcoachError::Config("constant credentials are read-only".into()))
    }

    fn accepts_fill(&self) -> bool {
        false
    }
}

/// Credentials provider: tiers are tried fastest-first, and a hit is copied
/// into every earlier writable tier so the next load stops sooner.
pub struct CredentialsChain {
    tiers: Vec<Box<dyn CredentialTier>>,
    /// Set by [`save`](Self::save); outranks every tier for this process.
    session: RwLock<Option<Credentials>>,
}

impl CredentialsChain {
    /// Tiers are read fastest first.
    pub fn new(tiers: Vec<Box<dyn CredentialTier>>) -> Self {
        Self {
            tiers,
            session: RwLock::new(None),
        }
    }

    /// The standard order: local mirror, user record, shared default, and
    /// `fallback` when given.
    pub fn standard(
        kv: Arc<dyn KeyValueStore>,
        records: Arc<dyn CredentialRecords>,
        fallback: Option<Credentials>,
    ) -> Self {
        let mut tiers: Vec<Box<dyn CredentialTier>> = vec![
            Box::new(LocalTier::new(kv.clone())),
            Box::new(UserRecordTier::new(records.clone(), kv)),
            Box::new(SharedDefaultTier::new(records)),
        ];
        if let Some(fallback) = fallback.filter(|c| !c.is_incomplete()) {
            tiers.push(Box::new(ConstantTier::new(fallback)));
        }
        Self::new(tiers)
    }

    /// Loads credentials. Tier errors count as misses.
    pub async fn load(&self) -> PrepcoachResult<Credentials> {
        if let Some(creds) = self.session.read().clone() {
            return Ok(creds);
        }

        for (idx, tier) in self.tiers.iter().enumerate() {
            match tier.get().await {
                Ok(Some(creds)) if !creds.is_incomplete() => {
                    info!(tier = tier.name(), "Credentials loaded");
                    self.fill_forward(idx, &creds).await;
                    return Ok(creds);
                }
                Ok(_) => debug!(tier = tier.name(), "No credentials in tier"),
                Err(e) => warn!(tier = tier.name(), error = %e, "Credential tier failed, trying next"),
            }
        }

        Err(PrepcoachError::Config("no credentials available from any tier".into()))
    }

    async fn fill_forward(&self, hit: usize, creds: &Credentials) {
        for tier in self.tiers[..hit].iter().filter(|t| t.accepts_fill()) {
            if let Err(e) = tier.put(creds).await {
                warn!(tier = tier.name(), error = %e, "Failed to copy credentials forward");
            }
        }
    }

    /// Saves credentials to every writable tier.
    ///
    /// The values are always kept for the rest of this process. Returns
    /// `false` when any durable write failed, in which case they only live
    /// for this session.
    pub async fn save(&self, api_key: &str, agent_id: &str) -> bool {
        let creds = Credentials::new(api_key, agent_id);
        *self.session.write() = Some(creds.clone());

        let mut persisted = true;
        for tier in self.tiers.iter().filter(|t| t.accepts_fill()) {
            if let Err(e) = tier.put(&creds).await {
                warn!(tier = tier.name(), error = %e, "Failed to save credentials");
                persisted = false;
            }
        }
        if !persisted {
            warn!("Credentials kept for this session only");
        }
        persisted
    }
}
