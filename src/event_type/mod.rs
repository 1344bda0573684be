//! Event type descriptors.
//!
//! An [`EventType`] is plain data: adding a new event type means constructing
//! another descriptor, not implementing a trait.

use crate::platform::Condition;
use std::time::Duration;

/// Builds the subscription condition for a subject id.
pub type ConditionBuilder = fn(&str) -> Condition;

/// Everything the components need to know about one EventSub event type.
#[derive(Clone, Debug)]
pub struct EventType {
    /// Unique EventSub type name (e.g. `channel.follow`)
    pub name: String,
    /// EventSub version for this type
    pub version: String,
    /// Scopes the subject must have granted
    pub required_scopes: Vec<String>,
    /// How long to suppress repeat subscribe attempts
    pub cooldown: Duration,
    /// Whether a successful subscription arms the cooldown
    pub should_set_cooldown: bool,
    condition: ConditionBuilder,
}

impl EventType {
    /// Descriptor with no required scopes, no cooldown and a
    /// `broadcaster_user_id` condition.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            required_scopes: Vec::new(),
            cooldown: Duration::ZERO,
            should_set_cooldown: false,
            condition: broadcaster_condition,
        }
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.required_scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Arm a cooldown of `cooldown` after each successful subscription.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self.should_set_cooldown = true;
        self
    }

    pub fn with_condition(mut self, condition: ConditionBuilder) -> Self {
        self.condition = condition;
        self
    }

    /// Condition for subscribing on behalf of `subject`.
    pub fn condition_for(&self, subject: &str) -> Condition {
        (self.condition)(subject)
    }
}

fn broadcaster_condition(subject: &str) -> Condition {
    Condition::from([("broadcaster_user_id".to_string(), subject.to_string())])
}

fn moderated_condition(subject: &str) -> Condition {
    Condition::from([
        ("broadcaster_user_id".to_string(), subject.to_string()),
        ("moderator_user_id".to_string(), subject.to_string()),
    ])
}

fn chat_condition(subject: &str) -> Condition {
    Condition::from([
        ("broadcaster_user_id".to_string(), subject.to_string()),
        ("user_id".to_string(), subject.to_string()),
    ])
}

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Built-in event types.
pub fn catalog() -> Vec<EventType> {
    vec![
        EventType::new("stream.online", "1").with_cooldown(HOUR),
        EventType::new("stream.offline", "1").with_cooldown(HOUR),
        EventType::new("channel.follow", "2")
            .with_scopes(&["moderator:read:followers"])
            .with_condition(moderated_condition)
            .with_cooldown(HOUR),
        EventType::new("channel.subscribe", "1")
            .with_scopes(&["channel:read:subscriptions"])
            .with_cooldown(HOUR),
        EventType::new("channel.chat.message", "1")
            .with_scopes(&["user:read:chat", "user:bot"])
            .with_condition(chat_condition)
            .with_cooldown(HOUR),
        EventType::new("channel.channel_points_custom_reward_redemption.add", "1")
            .with_scopes(&["channel:read:redemptions"])
            .with_cooldown(HOUR),
    ]
}

/// Look up a built-in event type by name.
pub fn find(name: &str) -> Option<EventType> {
    catalog().into_iter().find(|t| t.name == name)
}
