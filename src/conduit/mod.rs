//! Resolution and creation of the shared delivery conduit.
//!
//! Exactly one conduit with one webhook shard belongs to this deployment. Its
//! ids live in the shared cache under `conduit-id` and `conduit-shard-id`, next
//! to the signing secret registered on the shard (`conduit-secret`).
//!
//! ```text
//! get_conduit_id ──► cached ids + secret ──► platform confirms shard Enabled + webhook
//!                           │                         │
//!                        missing                anything else
//!                           └────────► None ◄─────────┘
//!
//! create_conduit ──► create (1 shard) ──► assign webhook transport to shard 0
//!                                     ──► persist id, secret, shard id
//! ```
//!
//! `get_conduit_id` never repairs state. Callers decide when to run
//! `create_conduit`, or use `ensure_conduit` to do both in order.

use crate::cancel;
use crate::platform::{PlatformApi, ShardAssignment, ShardStatus, Transport};
use crate::secret::SecretStore;
use crate::store::{keys, KeyValueStore};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// Shard that carries our webhook transport.
pub const SHARD_ID: &str = "0";

/// Cached identifiers of the deployment's conduit.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CachedConduit {
    conduit_id: String,
    shard_id: String,
}

/// Resolves (and on request creates) the conduit subscriptions are bound to.
pub struct ConduitResolver {
    api: Arc<dyn PlatformApi>,
    store: Arc<dyn KeyValueStore>,
    secrets: Arc<SecretStore>,
    callback_url: String,
}

impl ConduitResolver {
    /// # Arguments
    /// * `callback_url` - public URL the webhook receiver listens on
    pub fn new(
        api: Arc<dyn PlatformApi>,
        store: Arc<dyn KeyValueStore>,
        secrets: Arc<SecretStore>,
        callback_url: String,
    ) -> Self {
        Self {
            api,
            store,
            secrets,
            callback_url,
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// The cached conduit id, if the platform confirms its shard is live.
    ///
    /// Returns `None` when the cache is empty or partial, the conduit is gone,
    /// or the shard is missing, not Enabled, or not a webhook. Failures are
    /// logged and also yield `None`.
    pub async fn get_conduit_id(&self, ctx: &CancellationToken) -> Option<String> {
        let cached = match self.cached_conduit(ctx).await {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                debug!("No complete conduit record in cache");
                return None;
            }
            Err(e) if cancel::is_cancelled(&e) => {
                debug!("Conduit lookup cancelled");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to read conduit ids from cache");
                return None;
            }
        };

        match self.confirm_live(&cached, ctx).await {
            Ok(true) => Some(cached.conduit_id),
            Ok(false) => None,
            Err(e) if cancel::is_cancelled(&e) => {
                debug!(conduit_id = %cached.conduit_id, "Conduit check cancelled");
                None
            }
            Err(e) => {
                error!(
                    conduit_id = %cached.conduit_id,
                    error = %e,
                    "Failed to verify conduit with platform"
                );
                None
            }
        }
    }

    /// Create a new single-shard conduit with our webhook transport on shard 0.
    ///
    /// The shard normally comes back pending verification; the platform
    /// enables it once the receiver answers the challenge. Any other status is
    /// logged and creation still completes.
    pub async fn create_conduit(&self, ctx: &CancellationToken) -> Result<String> {
        let conduits = cancel::guard(ctx, self.api.create_conduits(1))
            .await
            .context("Failed to create conduit")?;
        let conduit_id = conduits
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| anyhow!("Platform returned no conduit"))?;
        info!(conduit_id = %conduit_id, "Created conduit");

        let secret = self
            .secrets
            .get_secret(ctx)
            .await
            .context("Failed to obtain signing secret")?;
        let assignment = ShardAssignment {
            id: SHARD_ID.to_string(),
            transport: Transport::Webhook {
                callback: self.callback_url.clone(),
                secret: secret.clone(),
            },
        };

        let update = cancel::guard(
            ctx,
            self.api
                .update_conduit_shards(&conduit_id, std::slice::from_ref(&assignment)),
        )
        .await
        .context("Failed to assign webhook transport to shard")?;

        for shard_error in &update.errors {
            warn!(
                conduit_id = %conduit_id,
                shard_id = %shard_error.id,
                code = ?shard_error.code,
                message = %shard_error.message,
                "Shard assignment reported an error"
            );
        }

        match update.shards.iter().find(|s| s.id == SHARD_ID) {
            Some(shard) if shard.status.is_post_creation_ok() => {
                info!(
                    conduit_id = %conduit_id,
                    status = ?shard.status,
                    callback = %self.callback_url,
                    "Shard assigned"
                );
            }
            Some(shard) => {
                warn!(
                    conduit_id = %conduit_id,
                    status = ?shard.status,
                    "Shard assigned with unexpected status"
                );
            }
            None => {
                warn!(conduit_id = %conduit_id, "Shard update did not report shard 0");
            }
        }

        // Three independent writes. A crash in between leaves a partial record
        // that get_conduit_id reports as None.
        self.persist(keys::CONDUIT_ID, &conduit_id, ctx).await?;
        self.persist(keys::CONDUIT_SECRET, &secret, ctx).await?;
        self.persist(keys::CONDUIT_SHARD_ID, SHARD_ID, ctx).await?;

        Ok(conduit_id)
    }

    /// Resolve the cached conduit, creating a new one if it cannot be confirmed.
    pub async fn ensure_conduit(&self, ctx: &CancellationToken) -> Result<String> {
        if let Some(conduit_id) = self.get_conduit_id(ctx).await {
            return Ok(conduit_id);
        }
        if ctx.is_cancelled() {
            return Err(cancel::Cancelled.into());
        }
        info!("No usable conduit, creating one");
        self.create_conduit(ctx).await
    }

    async fn cached_conduit(&self, ctx: &CancellationToken) -> Result<Option<CachedConduit>> {
        let conduit_id = cancel::guard(ctx, self.store.get(keys::CONDUIT_ID)).await?;
        let Some(conduit_id) = conduit_id else {
            return Ok(None);
        };
        let shard_id = cancel::guard(ctx, self.store.get(keys::CONDUIT_SHARD_ID)).await?;
        let Some(shard_id) = shard_id else {
            warn!(conduit_id = %conduit_id, "Conduit cached without shard id");
            return Ok(None);
        };
        // The shard was registered with this secret; without it inbound
        // deliveries cannot be verified.
        if !cancel::guard(ctx, self.store.exists(keys::CONDUIT_SECRET)).await? {
            warn!(conduit_id = %conduit_id, "Conduit cached without signing secret");
            return Ok(None);
        }
        Ok(Some(CachedConduit {
            conduit_id,
            shard_id,
        }))
    }

    async fn confirm_live(&self, cached: &CachedConduit, ctx: &CancellationToken) -> Result<bool> {
        let conduits = cancel::guard(ctx, self.api.get_conduits()).await?;
        if !conduits.iter().any(|c| c.id == cached.conduit_id) {
            warn!(conduit_id = %cached.conduit_id, "Cached conduit no longer exists");
            return Ok(false);
        }

        let shards = cancel::guard(ctx, self.api.get_conduit_shards(&cached.conduit_id)).await?;
        let Some(shard) = shards.iter().find(|s| s.id == cached.shard_id) else {
            warn!(
                conduit_id = %cached.conduit_id,
                shard_id = %cached.shard_id,
                "Cached shard not found on conduit"
            );
            return Ok(false);
        };

        if shard.status != ShardStatus::Enabled || !shard.transport.is_webhook() {
            debug!(
                conduit_id = %cached.conduit_id,
                shard_id = %shard.id,
                status = ?shard.status,
                method = %shard.transport.method,
                "Shard not live"
            );
            return Ok(false);
        }

        Ok(true)
    }

    async fn persist(&self, key: &str, value: &str, ctx: &CancellationToken) -> Result<()> {
        cancel::guard(ctx, self.store.set(key, value, None))
            .await
            .with_context(|| format!("Failed to persist {}", key))
    }
}
