use super::{PlatformApi, Subscription, SubscriptionFilter};
use crate::cancel;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Walks a subscription listing page by page.
///
/// A failed page reports through the error callback and ends the walk, since
/// the cursor for the following page is lost with it. Pages already fetched
/// stay valid. Cancellation ends the walk without invoking the callback.
pub struct SubscriptionPager<'a> {
    api: &'a dyn PlatformApi,
    filter: SubscriptionFilter,
    cursor: Option<String>,
    finished: bool,
}

impl<'a> SubscriptionPager<'a> {
    pub fn new(api: &'a dyn PlatformApi, filter: SubscriptionFilter) -> Self {
        Self {
            api,
            filter,
            cursor: None,
            finished: false,
        }
    }

    /// Fetch the next page. `None` once the listing is exhausted.
    pub async fn next_page(
        &mut self,
        ctx: &CancellationToken,
    ) -> Option<Result<Vec<Subscription>>> {
        if self.finished {
            return None;
        }

        let fetched = cancel::guard(
            ctx,
            self.api
                .get_subscriptions_page(&self.filter, self.cursor.as_deref()),
        )
        .await;

        match fetched {
            Ok(page) => {
                self.cursor = page.cursor.filter(|c| !c.is_empty());
                self.finished = self.cursor.is_none();
                Some(Ok(page.data))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    /// Visit every page, returning true if any subscription matched the filter.
    pub async fn any_match<E>(mut self, ctx: &CancellationToken, mut on_error: E) -> bool
    where
        E: FnMut(&anyhow::Error),
    {
        let mut found = false;
        let mut pages = 0usize;

        while let Some(page) = self.next_page(ctx).await {
            match page {
                Ok(subs) => {
                    pages += 1;
                    found |= subs.iter().any(|s| self.filter.matches(s));
                }
                Err(e) if cancel::is_cancelled(&e) => {
                    debug!(pages, "Subscription listing cancelled; result is partial");
                }
                Err(e) => on_error(&e),
            }
        }

        found
    }
}
