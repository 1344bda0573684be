//! Subscription eligibility based on granted permission scopes.
//!
//! Scope grants are owned by whoever completed the subject's authorization
//! flow; this module only reads them. Nothing is cached, since a subject can
//! revoke or extend its grant at any time.

use crate::event_type::EventType;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

mod sqlite;

pub use sqlite::SqliteScopeStore;

/// Read access to granted scopes.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    /// The subject's granted scopes, `None` if the subject has no grant record.
    async fn granted_scopes(&self, subject: &str) -> Result<Option<HashSet<String>>>;
}

/// In-memory scope grants (tests, single-process deployments).
#[derive(Default)]
pub struct MemoryScopeStore {
    grants: DashMap<String, HashSet<String>>,
}

impl MemoryScopeStore {
    pub fn new() -> Self {
        Self {
            grants: DashMap::new(),
        }
    }

    /// Record (replace) the scopes granted by `subject`.
    pub fn grant(&self, subject: &str, scopes: &[&str]) {
        self.grants.insert(
            subject.to_string(),
            scopes.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn revoke(&self, subject: &str) {
        self.grants.remove(subject);
    }
}

#[async_trait]
impl ScopeStore for MemoryScopeStore {
    async fn granted_scopes(&self, subject: &str) -> Result<Option<HashSet<String>>> {
        Ok(self.grants.get(subject).map(|g| g.value().clone()))
    }
}

/// Decides whether a subject may be subscribed to an event type.
#[derive(Clone)]
pub struct EligibilityChecker {
    scopes: Arc<dyn ScopeStore>,
}

impl EligibilityChecker {
    pub fn new(scopes: Arc<dyn ScopeStore>) -> Self {
        Self { scopes }
    }

    /// True iff the subject has a non-empty grant containing every scope
    /// `event_type` requires. A store failure counts as ineligible.
    pub async fn is_eligible(&self, subject: &str, event_type: &EventType) -> bool {
        let granted = match self.scopes.granted_scopes(subject).await {
            Ok(Some(granted)) if !granted.is_empty() => granted,
            Ok(_) => {
                debug!(subject = %subject, "No granted scopes");
                return false;
            }
            Err(e) => {
                error!(subject = %subject, error = %e, "Failed to read granted scopes");
                return false;
            }
        };

        let eligible = event_type
            .required_scopes
            .iter()
            .all(|scope| granted.contains(scope));
        if !eligible {
            debug!(
                subject = %subject,
                event_type = %event_type.name,
                "Subject lacks required scopes"
            );
        }
        eligible
    }
}
