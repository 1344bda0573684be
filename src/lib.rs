// Cancellation helpers shared by every remote call
pub mod cancel;

// Configuration loading
pub mod config;

// Shared key-value cache
pub mod store;

// Remote platform API (Helix) and pagination
pub mod platform;

// Subscribable event type catalog
pub mod event_type;

// Scope-based eligibility
pub mod eligibility;

// Per-subject subscription cooldown
pub mod cooldown;

// Webhook signing secret
pub mod secret;

// Conduit resolution and creation
pub mod conduit;

// Subscription creation and lookup
pub mod subscription;

#[cfg(test)]
mod testing;
