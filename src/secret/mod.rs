//! Signing secret for inbound webhook deliveries.
//!
//! The secret is registered with the conduit shard's transport, so it must not
//! change while that conduit is deployed. Lookup order:
//!
//! 1. in-process cache
//! 2. shared key-value store (`conduit-secret`)
//! 3. generate, then create-if-absent in the store
//!
//! Step 3 writes with `set_if_absent`: when two cold processes race, the loser
//! adopts the winner's value instead of overwriting it.

use crate::cancel;
use crate::store::{keys, KeyValueStore};
use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Length of generated secrets. The platform accepts 10-100 ASCII characters.
pub const SECRET_LEN: usize = 64;

/// Generate a random alphanumeric secret.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Process-wide access to the signing secret.
pub struct SecretStore {
    store: Arc<dyn KeyValueStore>,
    cached: OnceCell<String>,
}

impl SecretStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cached: OnceCell::new(),
        }
    }

    /// Return the secret, loading or creating it on first use.
    ///
    /// Failures are not cached; the next call retries.
    pub async fn get_secret(&self, ctx: &CancellationToken) -> Result<String> {
        let secret = self
            .cached
            .get_or_try_init(|| self.load_or_create(ctx))
            .await?;
        Ok(secret.clone())
    }

    async fn load_or_create(&self, ctx: &CancellationToken) -> Result<String> {
        if let Some(existing) = cancel::guard(ctx, self.store.get(keys::CONDUIT_SECRET)).await? {
            return Ok(existing);
        }

        let candidate = generate_secret();
        let won = cancel::guard(
            ctx,
            self.store
                .set_if_absent(keys::CONDUIT_SECRET, &candidate, None),
        )
        .await?;

        if won {
            info!("Generated new webhook signing secret");
            return Ok(candidate);
        }

        // Another process persisted first; adopt its value.
        cancel::guard(ctx, self.store.get(keys::CONDUIT_SECRET))
            .await?
            .ok_or_else(|| anyhow!("Signing secret vanished after concurrent creation"))
    }
}
