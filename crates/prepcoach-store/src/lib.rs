//! Persistence for PrepCoach.
//!
//! Everything the feedback pipeline writes outside its own process goes
//! through this crate: the hosted datastore (conversations, message logs,
//! feedback logs, stored credentials), and the durable key-value mirror that
//! survives restarts (current conversation id, user identifier, local
//! credential copy).
//!
//! # Main types
//!
//! - [`PersistenceGateway`] — Conversation, message-log and feedback-log writes.
//! - [`CredentialRecords`] — Per-user credential rows in the datastore.
//! - [`MemoryStore`] — In-process implementation of both traits.
//! - [`SupabaseStore`] — PostgREST implementation of both traits.
//! - [`KeyValueStore`] — Durable string map; [`FileKeyValueStore`] and [`MemoryKeyValueStore`].
//! - [`CredentialsChain`] — Ordered credential tiers with fill-forward.

/// Ordered credential tiers.
pub mod credentials;
/// Persistence gateway traits and record types.
pub mod gateway;
/// Durable key-value storage.
pub mod kv;
/// In-memory datastore.
pub mod memory;
/// Supabase (PostgREST) datastore.
pub mod supabase;

pub use credentials::{
    user_identifier, ConstantTier, CredentialTier, CredentialsChain, LocalTier, SharedDefaultTier,
    UserRecordTier,
};
pub use gateway::{
    ConversationFields, CredentialRecords, FeedbackLog, MessageLog, PersistenceGateway,
    PrepScoreRecord,
};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use memory::MemoryStore;
pub use supabase::{SupabaseConfig, SupabaseStore};
