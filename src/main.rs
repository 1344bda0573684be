use anyhow::{Context, Result};
use eventsub::cancel;
use eventsub::conduit::ConduitResolver;
use eventsub::config::{self, CacheBackend};
use eventsub::cooldown::CooldownGate;
use eventsub::eligibility::{EligibilityChecker, SqliteScopeStore};
use eventsub::event_type;
use eventsub::platform::HelixClient;
use eventsub::secret::SecretStore;
use eventsub::store::{KeyValueStore, MemoryStore, SqliteStore};
use eventsub::subscription::SubscriptionService;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventsub=info".into()),
        )
        .init();

    info!("EventSub conduit manager starting...");

    let config_path =
        std::env::var("EVENTSUB_CONFIG").unwrap_or_else(|_| "eventsub.toml".to_string());
    let config = config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.validate()?;
    let callback_url = config.callback_url()?;

    info!(
        config_path = %config_path,
        api_base_url = %config.platform.api_base_url,
        callback_url = %callback_url,
        cache_backend = ?config.cache.backend,
        "Configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::Sqlite => {
            let sqlite = SqliteStore::new(&config.cache.sqlite_path)
                .context("Failed to initialize cache store")?;
            // Expired cooldown rows accumulate across runs
            match sqlite.purge_expired() {
                Ok(purged) => info!(purged, "Purged expired cache entries"),
                Err(e) => warn!(error = %e, "Failed to purge expired cache entries"),
            }
            Arc::new(sqlite)
        }
    };

    let scopes = Arc::new(
        SqliteScopeStore::new(&config.scopes.sqlite_path)
            .context("Failed to initialize scope store")?,
    );

    let api = Arc::new(HelixClient::with_base_url(
        config.platform.client_id.clone(),
        config.platform.access_token.clone(),
        config.platform.api_base_url.clone(),
        Duration::from_secs(config.platform.request_timeout_seconds),
    )?);

    let secrets = Arc::new(SecretStore::new(Arc::clone(&store)));
    let resolver = Arc::new(ConduitResolver::new(
        api.clone(),
        Arc::clone(&store),
        secrets,
        callback_url,
    ));
    let service = SubscriptionService::new(
        api,
        Arc::clone(&resolver),
        EligibilityChecker::new(scopes),
        CooldownGate::new(Arc::clone(&store)),
    );

    // Cancel in-flight remote calls on shutdown
    let ctx = CancellationToken::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let conduit_id = match resolver.ensure_conduit(&ctx).await {
        Ok(id) => id,
        Err(e) if cancel::is_cancelled(&e) => {
            info!("Startup cancelled");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "Failed to bootstrap conduit");
            return Err(e);
        }
    };

    if resolver.get_conduit_id(&ctx).await.is_none() {
        // Fresh conduits stay pending until the callback answers the challenge
        warn!(
            conduit_id = %conduit_id,
            "Conduit not live yet; waiting for webhook verification"
        );
    } else {
        info!(conduit_id = %conduit_id, "Conduit live");
    }

    for event_type in event_type::catalog() {
        if ctx.is_cancelled() {
            break;
        }
        let subscribed = service.is_subscribed(&event_type, None, &ctx).await;
        info!(
            event_type = %event_type.name,
            version = %event_type.version,
            subscribed,
            "Subscription status"
        );
    }

    info!("EventSub conduit manager stopped");
    Ok(())
}
