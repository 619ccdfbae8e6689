use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Clock: one time source for version stamps and backoff sleeps
// ---------------------------------------------------------------------------

/// The single time source the engine reads. Version stamps, run timestamps,
/// and rate-limit backoff all go through this trait so tests can run on a
/// deterministic clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since epoch; the `_version` stamp.
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests: `sleep` advances time instantly and the
/// total slept duration is observable.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
    slept_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            slept_ms: AtomicI64::new(0),
        }
    }

    /// Advance the clock without recording a sleep.
    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Total time spent in `sleep`, in milliseconds.
    pub fn slept_ms(&self) -> i64 {
        self.slept_ms.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        chrono::TimeZone::timestamp_millis_opt(&Utc, self.now_ms.load(Ordering::SeqCst))
            .single()
            .expect("manual clock out of range")
    }

    async fn sleep(&self, duration: Duration) {
        let ms = duration.as_millis() as i64;
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
        self.slept_ms.fetch_add(ms, Ordering::SeqCst);
    }
}
