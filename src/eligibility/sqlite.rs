//! Scope grant persistence using SQLite.
//!
//! Written by the authorization flow when a subject connects, read by
//! [`EligibilityChecker`](super::EligibilityChecker) on every check.

use super::ScopeStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// Granted scopes per subject.
///
/// # Schema
/// ```sql
/// CREATE TABLE scope_grants (
///     subject    TEXT PRIMARY KEY,
///     scopes     TEXT NOT NULL,     -- JSON array of scope strings
///     created_at TEXT NOT NULL,     -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL      -- ISO 8601 timestamp
/// );
/// ```
pub struct SqliteScopeStore {
    conn: Mutex<Connection>,
}

impl SqliteScopeStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open scope DB at {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scope_grants (
                subject    TEXT PRIMARY KEY,
                scopes     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create scope_grants table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stores the scopes granted by `subject`, replacing any previous grant.
    pub fn store(&self, subject: &str, scopes: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(scopes).context("Failed to encode scopes")?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO scope_grants (subject, scopes, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(subject) DO UPDATE SET
                    scopes = excluded.scopes,
                    updated_at = excluded.updated_at
                "#,
                params![subject, encoded, now, now],
            )
            .context("Failed to store scope grant")?;
        Ok(())
    }

    /// Deletes a subject's grant. Returns Ok(()) whether or not the row exists.
    pub fn delete(&self, subject: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM scope_grants WHERE subject = ?1", params![subject])
            .context("Failed to delete scope grant")?;
        Ok(())
    }
}

#[async_trait]
impl ScopeStore for SqliteScopeStore {
    async fn granted_scopes(&self, subject: &str) -> Result<Option<HashSet<String>>> {
        let encoded: Option<String> = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT scopes FROM scope_grants WHERE subject = ?1",
                params![subject],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read scope grant")?;

        encoded
            .map(|raw| {
                serde_json::from_str::<HashSet<String>>(&raw)
                    .with_context(|| format!("Corrupt scope grant for subject {}", subject))
            })
            .transpose()
    }
}
