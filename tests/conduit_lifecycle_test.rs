// Integration tests for the conduit lifecycle over the public API
//
// The platform is a small in-memory double that remembers conduits, shard
// assignments and created subscriptions. The cache is either MemoryStore or a
// SqliteStore file shared between "processes" (separate store handles).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use eventsub::conduit::ConduitResolver;
use eventsub::cooldown::CooldownGate;
use eventsub::eligibility::{EligibilityChecker, MemoryScopeStore};
use eventsub::event_type;
use eventsub::platform::{
    Conduit, CreateOutcome, Page, PlatformApi, Shard, ShardAssignment, ShardStatus,
    ShardTransport, ShardUpdate, Subscription, SubscriptionFilter, SubscriptionRequest,
    SubscriptionStatus, Transport,
};
use eventsub::secret::{SecretStore, SECRET_LEN};
use eventsub::store::{keys, KeyValueStore, MemoryStore, SqliteStore};
use eventsub::subscription::{SubscribeDecision, SubscriptionService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ── Platform double ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Platform {
    created: AtomicUsize,
    conduits: Mutex<Vec<Conduit>>,
    shards: Mutex<Vec<(String, Shard)>>,
    secrets: Mutex<Vec<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Platform {
    /// Complete the webhook challenge for every pending shard.
    fn verify_webhooks(&self) {
        for (_, shard) in self.shards.lock().unwrap().iter_mut() {
            if shard.status == ShardStatus::WebhookVerificationPending {
                shard.status = ShardStatus::Enabled;
            }
        }
    }

    fn delete_conduits(&self) {
        self.conduits.lock().unwrap().clear();
        self.shards.lock().unwrap().clear();
    }

    fn conduit_count(&self) -> usize {
        self.conduits.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformApi for Platform {
    async fn create_conduits(&self, count: u32) -> Result<Vec<Conduit>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let mut conduits = self.conduits.lock().unwrap();
        let conduit = Conduit {
            id: format!("conduit-{}", n),
            shard_count: count,
        };
        conduits.push(conduit.clone());
        let mut shards = self.shards.lock().unwrap();
        for i in 0..count {
            shards.push((
                conduit.id.clone(),
                Shard {
                    id: i.to_string(),
                    status: ShardStatus::Disabled,
                    transport: ShardTransport {
                        method: String::new(),
                        callback: None,
                    },
                },
            ));
        }
        Ok(vec![conduit])
    }

    async fn get_conduits(&self) -> Result<Vec<Conduit>> {
        Ok(self.conduits.lock().unwrap().clone())
    }

    async fn get_conduit_shards(&self, conduit_id: &str) -> Result<Vec<Shard>> {
        Ok(self
            .shards
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == conduit_id)
            .map(|(_, shard)| shard.clone())
            .collect())
    }

    async fn update_conduit_shards(
        &self,
        conduit_id: &str,
        assignments: &[ShardAssignment],
    ) -> Result<ShardUpdate> {
        let mut update = ShardUpdate::default();
        let mut shards = self.shards.lock().unwrap();
        for assignment in assignments {
            let Transport::Webhook { callback, secret } = &assignment.transport else {
                return Err(anyhow!("only webhook shards are supported"));
            };
            self.secrets.lock().unwrap().push(secret.clone());
            for (_, shard) in shards
                .iter_mut()
                .filter(|(id, s)| id == conduit_id && s.id == assignment.id)
            {
                shard.status = ShardStatus::WebhookVerificationPending;
                shard.transport = ShardTransport {
                    method: "webhook".to_string(),
                    callback: Some(callback.clone()),
                };
                update.shards.push(shard.clone());
            }
        }
        Ok(update)
    }

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<CreateOutcome> {
        let Transport::Conduit { conduit_id } = &request.transport else {
            return Ok(CreateOutcome::Rejected {
                status: 400,
                message: "transport must be a conduit".to_string(),
            });
        };
        if !self.conduits.lock().unwrap().iter().any(|c| &c.id == conduit_id) {
            return Ok(CreateOutcome::Rejected {
                status: 400,
                message: "conduit not found".to_string(),
            });
        }
        let mut subs = self.subscriptions.lock().unwrap();
        let sub = Subscription {
            id: format!("sub-{}", subs.len() + 1),
            status: SubscriptionStatus::Enabled,
            event_type: request.event_type.clone(),
            version: request.version.clone(),
            condition: request.condition.clone(),
        };
        subs.push(sub.clone());
        Ok(CreateOutcome::Created(sub))
    }

    async fn get_subscriptions_page(
        &self,
        filter: &SubscriptionFilter,
        _cursor: Option<&str>,
    ) -> Result<Page<Subscription>> {
        let data = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        Ok(Page { data, cursor: None })
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

const CALLBACK: &str = "https://bot.example.com/api/eventsub/callback";

fn resolver(platform: &Arc<Platform>, store: Arc<dyn KeyValueStore>) -> Arc<ConduitResolver> {
    let secrets = Arc::new(SecretStore::new(store.clone()));
    Arc::new(ConduitResolver::new(
        platform.clone(),
        store,
        secrets,
        CALLBACK.to_string(),
    ))
}

fn service(
    platform: &Arc<Platform>,
    store: Arc<dyn KeyValueStore>,
    scopes: Arc<MemoryScopeStore>,
) -> SubscriptionService {
    SubscriptionService::new(
        platform.clone(),
        resolver(platform, store.clone()),
        EligibilityChecker::new(scopes),
        CooldownGate::new(store),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bootstrap_verify_then_subscribe() {
    let platform = Arc::new(Platform::default());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = CancellationToken::new();
    let resolver = resolver(&platform, store.clone());

    // Fresh deployment: nothing cached
    assert!(resolver.get_conduit_id(&ctx).await.is_none());

    let conduit_id = resolver.create_conduit(&ctx).await.unwrap();
    assert_eq!(
        store.get(keys::CONDUIT_ID).await.unwrap().as_deref(),
        Some(conduit_id.as_str())
    );

    // Pending until the callback answers the challenge
    assert!(resolver.get_conduit_id(&ctx).await.is_none());
    platform.verify_webhooks();
    assert_eq!(resolver.get_conduit_id(&ctx).await, Some(conduit_id.clone()));

    let scopes = Arc::new(MemoryScopeStore::new());
    scopes.grant("1001", &["moderator:read:followers"]);
    let service = service(&platform, store, scopes);
    let follow = event_type::find("channel.follow").unwrap();

    assert_eq!(
        service.subscribe_if_due("1001", &follow, &ctx).await,
        SubscribeDecision::Subscribed
    );
    assert!(service.is_subscribed(&follow, Some("1001"), &ctx).await);

    let subs = platform.subscriptions.lock().unwrap().clone();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].condition["broadcaster_user_id"], "1001");
}

#[tokio::test]
async fn test_registered_secret_matches_cached_secret() {
    let platform = Arc::new(Platform::default());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = CancellationToken::new();

    // Receiver asked for the secret before the conduit existed
    let receiver_secret = SecretStore::new(store.clone()).get_secret(&ctx).await.unwrap();

    resolver(&platform, store.clone())
        .create_conduit(&ctx)
        .await
        .unwrap();

    let registered = platform.secrets.lock().unwrap().clone();
    assert_eq!(registered, vec![receiver_secret.clone()]);
    assert_eq!(
        store.get(keys::CONDUIT_SECRET).await.unwrap(),
        Some(receiver_secret)
    );
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");
    let platform = Arc::new(Platform::default());
    let ctx = CancellationToken::new();

    let (conduit_id, secret) = {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::new(&db_path).unwrap());
        let id = resolver(&platform, store.clone())
            .create_conduit(&ctx)
            .await
            .unwrap();
        let secret = SecretStore::new(store).get_secret(&ctx).await.unwrap();
        (id, secret)
    };
    platform.verify_webhooks();

    // New process, same cache file
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::new(&db_path).unwrap());
    let restarted = resolver(&platform, store.clone());
    assert_eq!(restarted.get_conduit_id(&ctx).await, Some(conduit_id.clone()));
    assert_eq!(restarted.ensure_conduit(&ctx).await.unwrap(), conduit_id);
    assert_eq!(
        SecretStore::new(store).get_secret(&ctx).await.unwrap(),
        secret
    );
    assert_eq!(platform.conduit_count(), 1);
}

#[tokio::test]
async fn test_concurrent_processes_agree_on_secret() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");
    let ctx = CancellationToken::new();

    let stores: Vec<SecretStore> = (0..4)
        .map(|_| {
            let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::new(&db_path).unwrap());
            SecretStore::new(store)
        })
        .collect();

    let secrets = futures::future::join_all(stores.iter().map(|s| s.get_secret(&ctx))).await;
    let secrets: Vec<String> = secrets.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(secrets[0].len(), SECRET_LEN);
    assert!(secrets.iter().all(|s| s == &secrets[0]));
}

#[tokio::test]
async fn test_deleted_conduit_is_not_repaired_implicitly() {
    let platform = Arc::new(Platform::default());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = CancellationToken::new();
    let resolver = resolver(&platform, store.clone());

    let first = resolver.create_conduit(&ctx).await.unwrap();
    platform.verify_webhooks();
    platform.delete_conduits();

    assert!(resolver.get_conduit_id(&ctx).await.is_none());
    assert_eq!(platform.conduit_count(), 0);

    // Explicit bootstrap replaces it and keeps the secret
    let secret_before = store.get(keys::CONDUIT_SECRET).await.unwrap();
    let second = resolver.ensure_conduit(&ctx).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(store.get(keys::CONDUIT_SECRET).await.unwrap(), secret_before);
}

#[tokio::test]
async fn test_ineligible_subject_skipped_end_to_end() {
    let platform = Arc::new(Platform::default());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = CancellationToken::new();
    resolver(&platform, store.clone())
        .create_conduit(&ctx)
        .await
        .unwrap();
    platform.verify_webhooks();

    let scopes = Arc::new(MemoryScopeStore::new());
    scopes.grant("1001", &["channel:read:subscriptions"]);
    let service = service(&platform, store, scopes);
    let follow = event_type::find("channel.follow").unwrap();

    assert_eq!(
        service.subscribe_if_due("1001", &follow, &ctx).await,
        SubscribeDecision::Ineligible
    );
    assert!(platform.subscriptions.lock().unwrap().is_empty());
}
