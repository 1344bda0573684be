//! Cancellation propagated from callers.
//!
//! Every cache operation and remote call is raced against the caller's
//! `CancellationToken`. A fired token surfaces as [`Cancelled`] inside an
//! `anyhow::Error`, which callers can recognize with [`is_cancelled`].

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// The caller's token fired before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Run `fut` unless `ctx` is cancelled first.
pub async fn guard<T, F>(ctx: &CancellationToken, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Cancelled.into()),
        result = fut => result,
    }
}

/// True if `err` was produced by a fired cancellation token.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.is::<Cancelled>()
}
