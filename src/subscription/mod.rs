// EventSub subscription creation and lookup

mod service;


pub use service::{SubscribeDecision, SubscriptionService};
