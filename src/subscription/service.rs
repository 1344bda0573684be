use crate::cancel;
use crate::conduit::ConduitResolver;
use crate::cooldown::CooldownGate;
use crate::eligibility::EligibilityChecker;
use crate::event_type::EventType;
use crate::platform::{
    Condition, CreateOutcome, PlatformApi, SubscriptionFilter, SubscriptionPager,
    SubscriptionRequest, Transport,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What `subscribe_if_due` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeDecision {
    Subscribed,
    /// A recent attempt for this pair is still cooling down
    OnCooldown,
    /// Subject has not granted the scopes the event type needs
    Ineligible,
    AlreadySubscribed,
    /// Conduit unavailable, rejected by the platform, or transport fault
    Failed,
}

impl std::fmt::Display for SubscribeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscribeDecision::Subscribed => write!(f, "Subscribed"),
            SubscribeDecision::OnCooldown => write!(f, "Already tried recently, try again later"),
            SubscribeDecision::Ineligible => write!(f, "Missing required permissions"),
            SubscribeDecision::AlreadySubscribed => write!(f, "Already subscribed"),
            SubscribeDecision::Failed => write!(f, "Subscription failed"),
        }
    }
}

/// Creates and looks up EventSub subscriptions bound to our conduit.
///
/// Nothing here returns an error: every failure is logged and reported as
/// `false` (or [`SubscribeDecision::Failed`]). Retry policy belongs to the
/// caller, gated by the cooldown.
pub struct SubscriptionService {
    api: Arc<dyn PlatformApi>,
    resolver: Arc<ConduitResolver>,
    eligibility: EligibilityChecker,
    cooldown: CooldownGate,
}

impl SubscriptionService {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        resolver: Arc<ConduitResolver>,
        eligibility: EligibilityChecker,
        cooldown: CooldownGate,
    ) -> Self {
        Self {
            api,
            resolver,
            eligibility,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    pub fn eligibility(&self) -> &EligibilityChecker {
        &self.eligibility
    }

    /// Subscribe `subject` to `event_type` with `condition`.
    ///
    /// Returns false without contacting the platform if the subject is
    /// ineligible or no live conduit resolves. On success the cooldown is
    /// armed in the background when the event type asks for it.
    pub async fn subscribe(
        &self,
        subject: &str,
        event_type: &EventType,
        condition: Condition,
        ctx: &CancellationToken,
    ) -> bool {
        if !self.eligibility.is_eligible(subject, event_type).await {
            info!(
                subject = %subject,
                event_type = %event_type.name,
                "Skipping subscription: subject not eligible"
            );
            return false;
        }
        self.subscribe_eligible(subject, event_type, condition, ctx)
            .await
    }

    async fn subscribe_eligible(
        &self,
        subject: &str,
        event_type: &EventType,
        condition: Condition,
        ctx: &CancellationToken,
    ) -> bool {
        let Some(conduit_id) = self.resolver.get_conduit_id(ctx).await else {
            error!(
                subject = %subject,
                event_type = %event_type.name,
                "No live conduit; cannot subscribe"
            );
            return false;
        };

        let request = SubscriptionRequest {
            event_type: event_type.name.clone(),
            version: event_type.version.clone(),
            condition,
            transport: Transport::Conduit { conduit_id },
        };

        match cancel::guard(ctx, self.api.create_subscription(&request)).await {
            Ok(CreateOutcome::Created(sub)) => {
                info!(
                    subject = %subject,
                    event_type = %event_type.name,
                    subscription_id = %sub.id,
                    "Subscription created"
                );
                if event_type.should_set_cooldown {
                    // Fire-and-forget: the write completes on its own.
                    drop(self.cooldown.arm(subject, event_type));
                }
                true
            }
            Ok(CreateOutcome::Rejected { status, message }) => {
                warn!(
                    subject = %subject,
                    event_type = %event_type.name,
                    status,
                    message = %message,
                    "Subscription rejected by platform"
                );
                false
            }
            Err(e) if cancel::is_cancelled(&e) => {
                debug!(subject = %subject, event_type = %event_type.name, "Subscribe cancelled");
                false
            }
            Err(e) => {
                error!(
                    subject = %subject,
                    event_type = %event_type.name,
                    error = %e,
                    "Failed to create subscription"
                );
                false
            }
        }
    }

    /// True if an Enabled subscription of `event_type` exists (for `subject`,
    /// if given). Page failures are logged; see [`Self::is_subscribed_with`].
    pub async fn is_subscribed(
        &self,
        event_type: &EventType,
        subject: Option<&str>,
        ctx: &CancellationToken,
    ) -> bool {
        let name = event_type.name.clone();
        self.is_subscribed_with(event_type, subject, ctx, |e| {
            error!(event_type = %name, error = %e, "Failed to fetch subscriptions page");
        })
        .await
    }

    /// Like [`Self::is_subscribed`], reporting each failed page to `on_error`.
    ///
    /// `false` means "none seen": a failed or cancelled listing can hide a
    /// match, so callers needing certainty should treat it as unknown.
    pub async fn is_subscribed_with<E>(
        &self,
        event_type: &EventType,
        subject: Option<&str>,
        ctx: &CancellationToken,
        on_error: E,
    ) -> bool
    where
        E: FnMut(&anyhow::Error),
    {
        let filter = SubscriptionFilter::enabled(&event_type.name, subject);
        SubscriptionPager::new(self.api.as_ref(), filter)
            .any_match(ctx, on_error)
            .await
    }

    /// The full caller-side flow: cooldown, eligibility, existing
    /// subscription, then subscribe with the descriptor's condition.
    pub async fn subscribe_if_due(
        &self,
        subject: &str,
        event_type: &EventType,
        ctx: &CancellationToken,
    ) -> SubscribeDecision {
        if self.cooldown.is_on_cooldown(subject, event_type, ctx).await {
            debug!(subject = %subject, event_type = %event_type.name, "On cooldown");
            return SubscribeDecision::OnCooldown;
        }
        if !self.eligibility.is_eligible(subject, event_type).await {
            return SubscribeDecision::Ineligible;
        }
        if self.is_subscribed(event_type, Some(subject), ctx).await {
            return SubscribeDecision::AlreadySubscribed;
        }

        let condition = event_type.condition_for(subject);
        if self
            .subscribe_eligible(subject, event_type, condition, ctx)
            .await
        {
            SubscribeDecision::Subscribed
        } else {
            SubscribeDecision::Failed
        }
    }
}
