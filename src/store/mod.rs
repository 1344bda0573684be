//! Shared key-value cache used for conduit state, the signing secret and
//! cooldown entries.
//!
//! Components receive the store explicitly as `Arc<dyn KeyValueStore>`; there
//! is no process-global cache. Two backends are provided:
//!
//! - [`MemoryStore`] - in-process only (tests, single-process deployments)
//! - [`SqliteStore`] - persisted to a file shared by every process on the host

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Cache keys. Stable across process restarts.
pub mod keys {
    pub const CONDUIT_ID: &str = "conduit-id";
    pub const CONDUIT_SECRET: &str = "conduit-secret";
    pub const CONDUIT_SHARD_ID: &str = "conduit-shard-id";

    /// `cooldown:{subject}:{event_type}`
    pub fn cooldown(subject: &str, event_type: &str) -> String {
        format!("cooldown:{}:{}", subject, event_type)
    }
}

/// Get/set/exists with optional TTL.
///
/// Expired entries behave exactly like missing ones.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, replacing any previous entry. `ttl = None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `value` only when no live entry exists.
    ///
    /// Returns true if this call wrote the value.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
}
