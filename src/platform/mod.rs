//! Remote platform surface: conduits, shards and EventSub subscriptions.
//!
//! [`PlatformApi`] is the seam the components talk through. [`HelixClient`]
//! implements it over HTTP; tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod helix;
mod pager;

pub use helix::HelixClient;
pub use pager::SubscriptionPager;

/// Subscription condition: field name -> value (e.g. `broadcaster_user_id`).
pub type Condition = BTreeMap<String, String>;

/// A delivery channel maintained by the platform.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Conduit {
    pub id: String,
    pub shard_count: u32,
}

/// Shard status as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardStatus {
    Enabled,
    WebhookVerificationPending,
    Disabled,
    Unknown,
}

impl ShardStatus {
    /// Map a wire status string.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "enabled" => ShardStatus::Enabled,
            "webhook_callback_verification_pending" => ShardStatus::WebhookVerificationPending,
            "webhook_callback_verification_failed"
            | "notification_failures_exceeded"
            | "websocket_disconnected"
            | "websocket_failed_ping_pong"
            | "websocket_received_inbound_traffic"
            | "websocket_internal_error"
            | "websocket_network_timeout"
            | "websocket_network_error"
            | "websocket_failed_to_reconnect" => ShardStatus::Disabled,
            _ => ShardStatus::Unknown,
        }
    }

    /// Statuses acceptable right after assigning a webhook transport.
    ///
    /// The platform verifies the callback asynchronously, so pending is fine.
    pub fn is_post_creation_ok(self) -> bool {
        matches!(
            self,
            ShardStatus::Enabled | ShardStatus::WebhookVerificationPending
        )
    }
}

impl<'de> Deserialize<'de> for ShardStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ShardStatus::from_wire(&raw))
    }
}

/// Transport as reported back by the platform (secrets are never echoed).
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ShardTransport {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
}

impl ShardTransport {
    pub fn is_webhook(&self) -> bool {
        self.method == "webhook"
    }
}

/// A unit within a conduit bound to one transport.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Shard {
    pub id: String,
    pub status: ShardStatus,
    pub transport: ShardTransport,
}

/// Transport descriptor sent when assigning a shard or creating a subscription.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Transport {
    Webhook { callback: String, secret: String },
    Conduit { conduit_id: String },
}

// Hand-written so the signing secret never reaches a log line.
impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Webhook { callback, .. } => f
                .debug_struct("Webhook")
                .field("callback", callback)
                .field("secret", &"<redacted>")
                .finish(),
            Transport::Conduit { conduit_id } => f
                .debug_struct("Conduit")
                .field("conduit_id", conduit_id)
                .finish(),
        }
    }
}

/// Shard id + transport for `update_conduit_shards`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShardAssignment {
    pub id: String,
    pub transport: Transport,
}

/// A per-shard failure reported by `update_conduit_shards`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ShardError {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Result of `update_conduit_shards`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShardUpdate {
    pub shards: Vec<Shard>,
    pub errors: Vec<ShardError>,
}

/// Remote subscription status. Only `enabled` matters here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Enabled,
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_wire(&self) -> &str {
        match self {
            SubscriptionStatus::Enabled => "enabled",
            SubscriptionStatus::Other(s) => s,
        }
    }
}

impl<'de> Deserialize<'de> for SubscriptionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "enabled" => SubscriptionStatus::Enabled,
            _ => SubscriptionStatus::Other(raw),
        })
    }
}

/// An EventSub subscription as listed by the platform.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    #[serde(default)]
    pub condition: Condition,
}

impl Subscription {
    /// True if any condition field names `subject`.
    pub fn concerns(&self, subject: &str) -> bool {
        self.condition.values().any(|v| v == subject)
    }
}

/// Body of a subscription creation request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: Condition,
    pub transport: Transport,
}

/// Outcome of `create_subscription`.
///
/// A structured rejection is a value; only transport faults are `Err`.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    Created(Subscription),
    Rejected { status: u16, message: String },
}

/// Filter for listing subscriptions.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionFilter {
    pub status: SubscriptionStatus,
    pub event_type: Option<String>,
    pub subject: Option<String>,
}

impl SubscriptionFilter {
    /// Enabled subscriptions of `event_type`, optionally concerning `subject`.
    pub fn enabled(event_type: &str, subject: Option<&str>) -> Self {
        Self {
            status: SubscriptionStatus::Enabled,
            event_type: Some(event_type.to_string()),
            subject: subject.map(str::to_string),
        }
    }

    /// Client-side match. The platform applies at most one filter itself.
    pub fn matches(&self, sub: &Subscription) -> bool {
        if sub.status != self.status {
            return false;
        }
        if let Some(ty) = &self.event_type {
            if &sub.event_type != ty {
                return false;
            }
        }
        match &self.subject {
            Some(subject) => sub.concerns(subject),
            None => true,
        }
    }
}

/// One page of a paginated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Cursor for the next page, `None` on the last page.
    pub cursor: Option<String>,
}

// Not derived: an empty page needs no `T: Default`.
impl<T> Default for Page<T> {
    fn default() -> Self {
        Page {
            data: Vec::new(),
            cursor: None,
        }
    }
}

/// Remote platform operations consumed by this crate.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn create_conduits(&self, count: u32) -> Result<Vec<Conduit>>;

    async fn get_conduits(&self) -> Result<Vec<Conduit>>;

    /// All shards of a conduit (pagination is handled by the implementation).
    async fn get_conduit_shards(&self, conduit_id: &str) -> Result<Vec<Shard>>;

    async fn update_conduit_shards(
        &self,
        conduit_id: &str,
        assignments: &[ShardAssignment],
    ) -> Result<ShardUpdate>;

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<CreateOutcome>;

    /// Fetch one page of subscriptions. `cursor = None` starts from the top.
    async fn get_subscriptions_page(
        &self,
        filter: &SubscriptionFilter,
        cursor: Option<&str>,
    ) -> Result<Page<Subscription>>;
}
