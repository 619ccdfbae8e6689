use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EtlError, EtlResult};
use crate::model::clock::Clock;

// ---------------------------------------------------------------------------
// RateLimitState: per-upstream budget shared by all concurrent callers
// ---------------------------------------------------------------------------

/// Remaining-request budget and reset hint as last observed on response
/// headers. One instance per upstream, shared via `Arc`; reads are atomic.
#[derive(Debug)]
pub struct RateLimitState {
    /// Requests left in the current window; -1 when unknown.
    remaining: AtomicI64,
    /// Epoch seconds at which the window resets; 0 when unknown.
    reset_at: AtomicI64,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            remaining: AtomicI64::new(-1),
            reset_at: AtomicI64::new(0),
        }
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `X-RateLimit-Remaining` / `X-RateLimit-Reset` observations.
    pub fn observe(&self, remaining: Option<i64>, reset_at: Option<i64>) {
        if let Some(remaining) = remaining {
            self.remaining.store(remaining, Ordering::SeqCst);
        }
        if let Some(reset_at) = reset_at {
            self.reset_at.store(reset_at, Ordering::SeqCst);
        }
    }

    pub fn remaining(&self) -> Option<i64> {
        match self.remaining.load(Ordering::SeqCst) {
            -1 => None,
            value => Some(value),
        }
    }

    pub fn reset_at(&self) -> Option<i64> {
        match self.reset_at.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }

    /// The window is close to empty and callers should wait for the reset.
    pub fn nearly_exhausted(&self) -> bool {
        matches!(self.remaining(), Some(remaining) if remaining < 100)
    }
}

// ---------------------------------------------------------------------------
// RateLimiter: retry harness wrapping every upstream call
// ---------------------------------------------------------------------------

/// Seconds added past the published reset before retrying.
const RESET_GRACE_SECS: i64 = 10;

/// Wraps every upstream request in throttling and retry-with-backoff.
/// Retryable failures (network, 429, 5xx, rate-limit GraphQL payloads) are
/// re-attempted up to `max_retries` times with exponential backoff; when a
/// reset hint is known the wait extends to the reset plus a grace period.
pub struct RateLimiter {
    state: Arc<RateLimitState>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    calls: AtomicU64,
}

impl RateLimiter {
    pub fn new(state: Arc<RateLimitState>, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self {
            state,
            clock,
            max_retries,
            calls: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    /// Physical HTTP attempts issued through this limiter.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run one logical request. `op` is re-invoked for each physical
    /// attempt and must rebuild the request from scratch.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> EtlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EtlResult<T>>,
    {
        self.throttle_before_attempt().await;

        let mut attempt: u32 = 0;
        loop {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt, &err);
                    tracing::warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "retrying upstream request"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(EtlError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// When the observed budget is nearly gone, wait out the window before
    /// even issuing the request.
    async fn throttle_before_attempt(&self) {
        if !self.state.nearly_exhausted() {
            return;
        }
        if let Some(reset_at) = self.state.reset_at() {
            let wait = self.until_reset(reset_at);
            if !wait.is_zero() {
                tracing::info!(wait_secs = wait.as_secs(), "rate-limit budget low, waiting");
                self.clock.sleep(wait).await;
            }
        }
    }

    fn backoff_delay(&self, attempt: u32, err: &EtlError) -> Duration {
        let exponential = Duration::from_secs(1u64 << attempt.min(16));
        let reset_hint = match err {
            EtlError::RateLimited { reset_at, .. } => reset_at.or_else(|| self.state.reset_at()),
            EtlError::Api { status: 429, .. } => self.state.reset_at(),
            _ => None,
        };
        match reset_hint {
            Some(reset_at) => exponential.max(self.until_reset(reset_at)),
            None => exponential,
        }
    }

    /// `max(0, reset − now)` plus the grace period.
    fn until_reset(&self, reset_at: i64) -> Duration {
        let now = self.clock.now().timestamp();
        let wait = (reset_at - now).max(0) + RESET_GRACE_SECS;
        Duration::from_secs(wait as u64)
    }
}
