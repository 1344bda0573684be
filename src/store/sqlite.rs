//! Key-value cache persisted in SQLite.
//!
//! Survives restarts, so a process that comes back up reads the conduit id and
//! signing secret written by its predecessor instead of regenerating them.
//! Processes on the same host share state by opening the same file.

use super::KeyValueStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Persistent key-value store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE cache_entries (
///     key        TEXT PRIMARY KEY,
///     value      TEXT NOT NULL,
///     expires_at TEXT,              -- RFC 3339, NULL = never
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// Statements run on the blocking pool: `set_if_absent` may wait up to the
/// busy timeout for another process holding the write lock.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the table exists.
    ///
    /// Pass `":memory:"` for a private, non-persistent store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache DB at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at TEXT,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create cache_entries table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut *conn)
        })
        .await
        .context("Cache task failed")?
    }

    /// Deletes expired rows. Reads already ignore them; this only reclaims space.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let mut stmt = conn
            .prepare("SELECT key, expires_at FROM cache_entries WHERE expires_at IS NOT NULL")
            .context("Failed to prepare purge query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to query cache entries")?;

        let mut expired = Vec::new();
        for row in rows {
            let (key, expires_at) = row.context("Failed to read cache row")?;
            if !is_live(Some(&expires_at), now)? {
                expired.push(key);
            }
        }
        drop(stmt);

        for key in &expired {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .context("Failed to delete expired entry")?;
        }
        Ok(expired.len())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn expiry(ttl: Option<Duration>) -> Result<Option<String>> {
    match ttl {
        None => Ok(None),
        Some(ttl) => {
            let at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .ok_or_else(|| anyhow!("TTL out of range: {:?}", ttl))?;
            Ok(Some(format_ts(at)))
        }
    }
}

fn is_live(expires_at: Option<&str>, now: DateTime<Utc>) -> Result<bool> {
    match expires_at {
        None => Ok(true),
        Some(ts) => {
            let at: DateTime<Utc> = ts
                .parse()
                .with_context(|| format!("Failed to parse expires_at '{}'", ts))?;
            Ok(now < at)
        }
    }
}

fn read_live(conn: &Connection, key: &str) -> Result<Option<String>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to read cache entry")?;

    match row {
        Some((value, expires_at)) if is_live(expires_at.as_deref(), Utc::now())? => {
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn upsert(conn: &Connection, key: &str, value: &str, expires_at: Option<String>) -> Result<()> {
    conn.execute(
        "INSERT INTO cache_entries (key, value, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             expires_at = excluded.expires_at,
             updated_at = excluded.updated_at",
        params![key, value, expires_at, format_ts(Utc::now())],
    )
    .context("Failed to write cache entry")?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| read_live(conn, &key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(ttl)?;
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| upsert(conn, &key, &value, expires_at))
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let expires_at = expiry(ttl)?;
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            // IMMEDIATE takes the write lock up front, so two processes cannot
            // both observe the key as absent.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("Failed to begin transaction")?;

            if read_live(&tx, &key)?.is_some() {
                return Ok(false);
            }
            upsert(&tx, &key, &value, expires_at)?;
            tx.commit().context("Failed to commit cache entry")?;
            Ok(true)
        })
        .await
    }
}
