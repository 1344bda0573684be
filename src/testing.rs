//! In-memory platform double shared by component tests.

use crate::platform::{
    Conduit, CreateOutcome, Page, PlatformApi, Shard, ShardAssignment, ShardStatus,
    ShardTransport, ShardUpdate, Subscription, SubscriptionFilter, SubscriptionRequest,
    SubscriptionStatus, Transport,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted listing page: data or a failure message.
pub type ScriptedPage = std::result::Result<Vec<Subscription>, String>;

/// Scriptable stand-in for the remote platform with call counters.
pub struct FakePlatform {
    conduits: Mutex<Vec<Conduit>>,
    shards: Mutex<HashMap<String, Vec<Shard>>>,
    /// Status a shard reports right after a transport is assigned
    pub assign_status: Mutex<ShardStatus>,
    /// Secrets sent in webhook transports, in order
    pub assigned_secrets: Mutex<Vec<String>>,
    /// When set, create_subscription answers with this rejection
    pub reject_with: Mutex<Option<(u16, String)>>,
    /// When set, every call fails like a dropped connection
    pub offline: AtomicBool,
    /// When set, only create_subscription fails like a dropped connection
    pub subscriptions_offline: AtomicBool,
    pub created_requests: Mutex<Vec<SubscriptionRequest>>,
    pages: Mutex<Vec<ScriptedPage>>,
    pub create_conduit_calls: AtomicUsize,
    pub get_conduits_calls: AtomicUsize,
    pub create_subscription_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            conduits: Mutex::new(Vec::new()),
            shards: Mutex::new(HashMap::new()),
            assign_status: Mutex::new(ShardStatus::WebhookVerificationPending),
            assigned_secrets: Mutex::new(Vec::new()),
            reject_with: Mutex::new(None),
            offline: AtomicBool::new(false),
            subscriptions_offline: AtomicBool::new(false),
            created_requests: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
            create_conduit_calls: AtomicUsize::new(0),
            get_conduits_calls: AtomicUsize::new(0),
            create_subscription_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    /// Pretend the platform already has `conduit_id` with one shard.
    pub fn with_conduit(self, conduit_id: &str, status: ShardStatus, method: &str) -> Self {
        self.conduits.lock().unwrap().push(Conduit {
            id: conduit_id.to_string(),
            shard_count: 1,
        });
        self.shards.lock().unwrap().insert(
            conduit_id.to_string(),
            vec![shard("0", status, method)],
        );
        self
    }

    /// Platform-side status change (e.g. webhook verification completing).
    pub fn set_shard_status(&self, conduit_id: &str, shard_id: &str, status: ShardStatus) {
        if let Some(shards) = self.shards.lock().unwrap().get_mut(conduit_id) {
            for s in shards.iter_mut().filter(|s| s.id == shard_id) {
                s.status = status;
            }
        }
    }

    /// Replace the scripted subscription listing.
    pub fn script_pages(&self, pages: Vec<ScriptedPage>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        }
    }
}

pub fn shard(id: &str, status: ShardStatus, method: &str) -> Shard {
    Shard {
        id: id.to_string(),
        status,
        transport: ShardTransport {
            method: method.to_string(),
            callback: None,
        },
    }
}

pub fn enabled_sub(id: &str, event_type: &str, broadcaster: &str) -> Subscription {
    Subscription {
        id: id.to_string(),
        status: SubscriptionStatus::Enabled,
        event_type: event_type.to_string(),
        version: "1".to_string(),
        condition: [("broadcaster_user_id".to_string(), broadcaster.to_string())]
            .into_iter()
            .collect(),
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn create_conduits(&self, count: u32) -> Result<Vec<Conduit>> {
        self.check_online()?;
        let n = self.create_conduit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let conduit = Conduit {
            id: format!("conduit-{}", n),
            shard_count: count,
        };
        self.conduits.lock().unwrap().push(conduit.clone());
        let shards = (0..count)
            .map(|i| shard(&i.to_string(), ShardStatus::Disabled, ""))
            .collect();
        self.shards
            .lock()
            .unwrap()
            .insert(conduit.id.clone(), shards);
        Ok(vec![conduit])
    }

    async fn get_conduits(&self) -> Result<Vec<Conduit>> {
        self.check_online()?;
        self.get_conduits_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.conduits.lock().unwrap().clone())
    }

    async fn get_conduit_shards(&self, conduit_id: &str) -> Result<Vec<Shard>> {
        self.check_online()?;
        self.shards
            .lock()
            .unwrap()
            .get(conduit_id)
            .cloned()
            .ok_or_else(|| anyhow!("Helix API error: 404 Not Found"))
    }

    async fn update_conduit_shards(
        &self,
        conduit_id: &str,
        assignments: &[ShardAssignment],
    ) -> Result<ShardUpdate> {
        self.check_online()?;
        let status = *self.assign_status.lock().unwrap();
        let mut all = self.shards.lock().unwrap();
        let shards = all
            .get_mut(conduit_id)
            .ok_or_else(|| anyhow!("Helix API error: 404 Not Found"))?;

        let mut update = ShardUpdate::default();
        for assignment in assignments {
            let Transport::Webhook { callback, secret } = &assignment.transport else {
                return Err(anyhow!("fake only supports webhook transports"));
            };
            self.assigned_secrets.lock().unwrap().push(secret.clone());
            for s in shards.iter_mut().filter(|s| s.id == assignment.id) {
                s.status = status;
                s.transport = ShardTransport {
                    method: "webhook".to_string(),
                    callback: Some(callback.clone()),
                };
                update.shards.push(s.clone());
            }
        }
        Ok(update)
    }

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<CreateOutcome> {
        self.create_subscription_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.subscriptions_offline.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset by peer"));
        }
        self.created_requests.lock().unwrap().push(request.clone());

        if let Some((status, message)) = self.reject_with.lock().unwrap().clone() {
            return Ok(CreateOutcome::Rejected { status, message });
        }
        Ok(CreateOutcome::Created(Subscription {
            id: format!("sub-{}", Self::count(&self.create_subscription_calls)),
            status: SubscriptionStatus::Enabled,
            event_type: request.event_type.clone(),
            version: request.version.clone(),
            condition: request.condition.clone(),
        }))
    }

    async fn get_subscriptions_page(
        &self,
        _filter: &SubscriptionFilter,
        cursor: Option<&str>,
    ) -> Result<Page<Subscription>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let index: usize = match cursor {
            Some(c) => c.trim_start_matches('p').parse()?,
            None => 0,
        };
        let pages = self.pages.lock().unwrap();
        let Some(scripted) = pages.get(index) else {
            return Ok(Page::default());
        };
        let data = scripted.clone().map_err(|message| anyhow!(message))?;
        let cursor = (index + 1 < pages.len()).then(|| format!("p{}", index + 1));
        Ok(Page { data, cursor })
    }
}
