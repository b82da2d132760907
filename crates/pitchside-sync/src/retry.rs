//! # Retry Policy
//!
//! Doubling delays shared by the reconnect state machine and the loader.
//!
//! ```text
//! attempt n  →  base * 2^(n-1)
//!
//! base = 1000ms:   1s, 2s, 4s, 8s, 16s, then None (cap reached)
//! ```
//!
//! `backoff::ExponentialBackoff` randomizes its intervals, so the exact
//! schedule is implemented here as a [`Backoff`] and driven through
//! `backoff::future::retry_notify`.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::warn;

use crate::error::SyncResult;

/// `base * 2^(n-1)` with a fixed attempt cap.
#[derive(Debug, Clone)]
pub struct DoublingBackoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl DoublingBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay before attempt `n` (1-based).
    pub fn delay_for(base: Duration, n: u32) -> Duration {
        let exp = n.saturating_sub(1).min(31);
        base.saturating_mul(1u32 << exp)
    }
}

impl Backoff for DoublingBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(Self::delay_for(self.base, self.attempt))
    }
}

/// Runs `op` until it succeeds or `retries` retries have failed.
///
/// Every error is treated as transient. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    base: Duration,
    retries: u32,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let policy = DoublingBackoff::new(base, retries);

    backoff::future::retry_notify(
        policy,
        || {
            let attempt = op();
            async move { attempt.await.map_err(backoff::Error::transient) }
        },
        |err, delay: Duration| {
            warn!(label, ?err, delay_ms = delay.as_millis() as u64, "Attempt failed, retrying");
        },
    )
    .await
}
