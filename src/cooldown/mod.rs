// Cooldown gate for subscribe attempts.
//
// One cache key per (subject, event type). The key's presence blocks the
// attempt; its TTL is the event type's cooldown. The cache is a best-effort
// throttle, so arming never participates in the caller's success path.

use crate::cancel;
use crate::event_type::EventType;
use crate::store::{keys, KeyValueStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache-backed suppression of repeat subscribe attempts.
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn KeyValueStore>,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// True if an attempt for this pair happened within the cooldown window.
    ///
    /// An unreachable cache reads as "not on cooldown"; the remote API
    /// tolerates the occasional duplicate attempt.
    pub async fn is_on_cooldown(
        &self,
        subject: &str,
        event_type: &EventType,
        ctx: &CancellationToken,
    ) -> bool {
        let key = keys::cooldown(subject, &event_type.name);
        match cancel::guard(ctx, self.store.exists(&key)).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(key = %key, error = %e, "Cooldown check failed");
                false
            }
        }
    }

    /// Arm the cooldown in the background.
    ///
    /// Returns immediately. The handle is only for callers that want to
    /// observe completion (tests); dropping it does not cancel the write.
    pub fn arm(&self, subject: &str, event_type: &EventType) -> JoinHandle<()> {
        let store = self.store.clone();
        let key = keys::cooldown(subject, &event_type.name);
        let ttl = event_type.cooldown;

        tokio::spawn(async move {
            match store.set(&key, "1", Some(ttl)).await {
                Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "Cooldown armed"),
                Err(e) => warn!(key = %key, error = %e, "Failed to arm cooldown"),
            }
        })
    }
}
