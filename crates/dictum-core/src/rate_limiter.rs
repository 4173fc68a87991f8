//! Multi-category token bucket rate limiting
//!
//! Each category owns a [`TokenBucket`] and a FIFO queue of suspended
//! requests. Acquiring tokens either succeeds immediately or returns a
//! [`RateLimitDeferred`] that completes once the periodic refill tick (or a
//! later acquire in the same category) admits it.
//!
//! Features:
//! - Lazy refill on every call, capped at capacity
//! - Strict FIFO admission per category, no skipping ahead
//! - Wait time estimates for countdown displays
//! - Injected clock and scheduler for deterministic tests

use crate::clock::{Clock, Scheduler, SystemClock};
use crate::config::{BucketConfig, RateLimiterConfig};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

// ============================================================================
// Token Bucket
// ============================================================================

/// Slack when comparing fractional token counts; rates such as 0.1/s are
/// not exact in binary
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket for a single category
///
/// Tokens accumulate lazily: every operation first credits the tokens earned
/// since the last refill, never exceeding capacity. Earnings are measured
/// from the level at the last consume or refund, not summed per refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate_per_second: f64,
    last_refill_at: Instant,
    anchor_tokens: f64,
    anchor_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate_per_second: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate_per_second,
            last_refill_at: now,
            anchor_tokens: capacity,
            anchor_at: now,
        }
    }

    pub fn from_config(config: &BucketConfig, now: Instant) -> Self {
        Self::new(config.capacity, config.refill_rate_per_second, now)
    }

    /// Credit tokens for the time elapsed since the last refill
    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill_at {
            return;
        }
        let elapsed = now.saturating_duration_since(self.anchor_at);
        let earned = elapsed.as_secs_f64() * self.refill_rate_per_second;
        self.tokens = (self.anchor_tokens + earned).min(self.capacity);
        self.last_refill_at = now;
        if self.tokens >= self.capacity {
            self.reanchor();
        }
    }

    /// Take `count` tokens if they are available
    pub fn try_consume(&mut self, count: f64) -> bool {
        if self.tokens + TOKEN_EPSILON >= count {
            self.tokens = (self.tokens - count).max(0.0);
            self.reanchor();
            true
        } else {
            false
        }
    }

    /// Give back tokens that were taken but not used
    pub fn refund(&mut self, count: f64) {
        self.tokens = (self.tokens + count).min(self.capacity);
        self.reanchor();
    }

    /// Milliseconds until `count` tokens are available, zero if they already are
    pub fn wait_time_ms(&self, count: f64) -> u64 {
        let missing = count - self.tokens;
        if missing <= TOKEN_EPSILON {
            return 0;
        }
        (missing / self.refill_rate_per_second * 1000.0).ceil() as u64
    }

    fn reanchor(&mut self) {
        self.anchor_tokens = self.tokens;
        self.anchor_at = self.last_refill_at;
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate_per_second
    }

    pub fn last_refill_at(&self) -> Instant {
        self.last_refill_at
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

struct Waiter {
    count: u32,
    enqueued_at: Instant,
    tx: oneshot::Sender<()>,
}

struct Category {
    bucket: TokenBucket,
    waiters: VecDeque<Waiter>,
}

impl Category {
    /// Tokens requested by everyone already queued
    fn queued_demand(&self) -> f64 {
        self.waiters.iter().map(|w| f64::from(w.count)).sum()
    }

    /// Admit waiters from the front until one does not fit.
    ///
    /// Waiters whose future was dropped are discarded without taking tokens.
    fn admit_waiters(&mut self, name: &str, now: Instant) -> u64 {
        let mut admitted = 0;
        while let Some(front) = self.waiters.front() {
            if front.tx.is_closed() {
                trace!("Discarding abandoned waiter in category '{}'", name);
                self.waiters.pop_front();
                continue;
            }
            let count = f64::from(front.count);
            if !self.bucket.try_consume(count) {
                break;
            }
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.tx.send(()).is_err() {
                self.bucket.refund(count);
                continue;
            }
            debug!(
                "Rate limiter: admitted {} tokens in '{}' after {:?}",
                waiter.count,
                name,
                now.saturating_duration_since(waiter.enqueued_at)
            );
            admitted += 1;
        }
        admitted
    }
}

/// Outcome of [`RateLimiter::acquire`]
#[derive(Debug)]
#[must_use = "a deferred acquire does nothing unless awaited"]
pub enum Acquire {
    /// Tokens were deducted, the work may proceed now
    Granted,
    /// The request is queued, await the value to be admitted
    Deferred(RateLimitDeferred),
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }

    /// Wait until admitted; completes immediately when already granted
    pub async fn admitted(self) -> Result<()> {
        match self {
            Acquire::Granted => Ok(()),
            Acquire::Deferred(deferred) => deferred.await,
        }
    }
}

/// Deferred success: the request is queued behind the category's FIFO.
///
/// Carries the estimated wait so callers can back off or show a countdown.
/// Awaiting it resolves once the tokens have been deducted on the caller's
/// behalf. Dropping it abandons the place in the queue.
pub struct RateLimitDeferred {
    category: String,
    count: u32,
    wait_time_ms: u64,
    rx: oneshot::Receiver<()>,
}

impl RateLimitDeferred {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Estimated wait at the time the request was queued
    pub fn wait_time_ms(&self) -> u64 {
        self.wait_time_ms
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

impl fmt::Debug for RateLimitDeferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitDeferred")
            .field("category", &self.category)
            .field("count", &self.count)
            .field("wait_time_ms", &self.wait_time_ms)
            .finish()
    }
}

impl Future for RateLimitDeferred {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::LimiterDropped(this.category.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Point-in-time view of one category
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStatus {
    /// Whole tokens currently available
    pub available_tokens: u64,
    pub capacity: f64,
    pub refill_rate_per_second: f64,
    /// Milliseconds until at least one token is available
    pub wait_time_for_next_token_ms: u64,
    /// Requests queued behind the bucket
    pub queued_waiters: usize,
}

#[derive(Debug, Default)]
struct Counters {
    granted: AtomicU64,
    deferred: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

/// Rate limiter statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Requests granted without waiting
    pub granted: u64,
    /// Requests that had to queue
    pub deferred: u64,
    /// Queued requests later admitted
    pub admitted: u64,
    /// Requests rejected for an unknown category or oversize count
    pub rejected: u64,
}

impl fmt::Display for RateLimiterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RateLimiter({} granted, {} deferred, {} admitted, {} rejected)",
            self.granted, self.deferred, self.admitted, self.rejected
        )
    }
}

/// Admission control over a fixed set of categories
///
/// All bucket and queue state sits behind a single lock, so concurrent
/// callers never race on a bucket. Waiters are resolved by [`tick`](Self::tick),
/// which [`start_refill`](Self::start_refill) runs on the configured interval.
pub struct RateLimiter {
    categories: Mutex<HashMap<String, Category>>,
    clock: Arc<dyn Clock>,
    refill_interval: Duration,
    counters: Counters,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter on the given clock
    pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        let categories = config
            .categories
            .iter()
            .map(|(name, bucket)| {
                (
                    name.clone(),
                    Category {
                        bucket: TokenBucket::from_config(bucket, now),
                        waiters: VecDeque::new(),
                    },
                )
            })
            .collect();

        debug!(
            "Rate limiter configured with categories {:?}",
            config.categories.keys().collect::<Vec<_>>()
        );

        Ok(Self {
            categories: Mutex::new(categories),
            clock,
            refill_interval: config.refill_interval(),
            counters: Counters::default(),
        })
    }

    /// Try to take `count` tokens from `category`
    ///
    /// Returns [`Acquire::Granted`] when the tokens were deducted right away.
    /// Otherwise the request joins the back of the category's queue and the
    /// returned [`RateLimitDeferred`] reports the estimated wait, computed
    /// over everything queued ahead of it plus this request.
    ///
    /// A request never overtakes an earlier waiter even if enough tokens
    /// exist for it alone.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownCategory`] if `category` is not configured
    /// - [`Error::ExceedsCapacity`] if `count` is larger than the bucket can
    ///   ever hold. Such a request could never be admitted and would block
    ///   every waiter behind it, so it is rejected instead of queued.
    ///
    /// A `count` of zero is always granted.
    pub fn acquire(&self, category: &str, count: u32) -> Result<Acquire> {
        let now = self.clock.now();
        let mut categories = self.categories.lock();
        let Some(cat) = categories.get_mut(category) else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::UnknownCategory(category.to_string()));
        };

        if f64::from(count) > cat.bucket.capacity() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ExceedsCapacity {
                category: category.to_string(),
                requested: count,
                capacity: cat.bucket.capacity(),
            });
        }

        if count == 0 {
            self.counters.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(Acquire::Granted);
        }

        cat.bucket.refill(now);
        let admitted = cat.admit_waiters(category, now);
        self.counters.admitted.fetch_add(admitted, Ordering::Relaxed);

        if cat.waiters.is_empty() && cat.bucket.try_consume(f64::from(count)) {
            self.counters.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(Acquire::Granted);
        }

        let wait_time_ms = cat
            .bucket
            .wait_time_ms(cat.queued_demand() + f64::from(count));
        let (tx, rx) = oneshot::channel();
        cat.waiters.push_back(Waiter {
            count,
            enqueued_at: now,
            tx,
        });
        self.counters.deferred.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Rate limit reached for '{}': {} tokens queued behind {} waiters, ~{}ms",
            category,
            count,
            cat.waiters.len() - 1,
            wait_time_ms
        );

        Ok(Acquire::Deferred(RateLimitDeferred {
            category: category.to_string(),
            count,
            wait_time_ms,
            rx,
        }))
    }

    /// Acquire and wait until admitted
    pub async fn acquire_wait(&self, category: &str, count: u32) -> Result<()> {
        self.acquire(category, count)?.admitted().await
    }

    /// Take tokens only if that is possible right now; never queues.
    ///
    /// Returns `false` when the tokens are missing or earlier waiters exist.
    pub fn try_acquire(&self, category: &str, count: u32) -> Result<bool> {
        let now = self.clock.now();
        let mut categories = self.categories.lock();
        let Some(cat) = categories.get_mut(category) else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::UnknownCategory(category.to_string()));
        };

        cat.bucket.refill(now);
        let admitted = cat.admit_waiters(category, now);
        self.counters.admitted.fetch_add(admitted, Ordering::Relaxed);

        let granted = cat.waiters.is_empty() && cat.bucket.try_consume(f64::from(count));
        if granted {
            self.counters.granted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(granted)
    }

    /// Snapshot of one category
    pub fn status(&self, category: &str) -> Result<BucketStatus> {
        let now = self.clock.now();
        let mut categories = self.categories.lock();
        let cat = categories
            .get_mut(category)
            .ok_or_else(|| Error::UnknownCategory(category.to_string()))?;

        cat.bucket.refill(now);
        let available = cat.bucket.available();

        Ok(BucketStatus {
            available_tokens: (available + TOKEN_EPSILON).floor() as u64,
            capacity: cat.bucket.capacity(),
            refill_rate_per_second: cat.bucket.refill_rate(),
            wait_time_for_next_token_ms: cat.bucket.wait_time_ms(1.0),
            queued_waiters: cat.waiters.len(),
        })
    }

    /// Configured category names, sorted
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Refill every bucket and admit queued waiters in arrival order
    ///
    /// Returns the number of waiters admitted.
    pub fn tick(&self) -> u64 {
        let now = self.clock.now();
        let mut categories = self.categories.lock();
        let mut admitted = 0;
        for (name, cat) in categories.iter_mut() {
            cat.bucket.refill(now);
            admitted += cat.admit_waiters(name, now);
        }
        drop(categories);

        if admitted > 0 {
            self.counters.admitted.fetch_add(admitted, Ordering::Relaxed);
            trace!("Refill tick admitted {} waiters", admitted);
        }
        admitted
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Run [`tick`](Self::tick) on the configured interval until the returned
    /// task is stopped or dropped, or the limiter itself is dropped.
    pub fn start_refill(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) -> RefillTask {
        let stop = Arc::new(AtomicBool::new(false));
        schedule_refill(
            Arc::downgrade(self),
            scheduler,
            self.refill_interval,
            stop.clone(),
        );
        RefillTask { stop }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            granted: self.counters.granted.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("categories", &self.categories())
            .field("refill_interval", &self.refill_interval)
            .finish()
    }
}

fn schedule_refill(
    limiter: Weak<RateLimiter>,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let next = scheduler.clone();
    scheduler.schedule_once(
        interval,
        Box::new(move || {
            if stop.load(Ordering::Acquire) {
                return;
            }
            let Some(strong) = limiter.upgrade() else {
                warn!("Rate limiter dropped, stopping refill tick");
                return;
            };
            strong.tick();
            drop(strong);
            schedule_refill(limiter, next, interval, stop);
        }),
    );
}

/// Handle to the periodic refill started by [`RateLimiter::start_refill`]
#[derive(Debug)]
pub struct RefillTask {
    stop: Arc<AtomicBool>,
}

impl RefillTask {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for RefillTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: &ManualClock, capacity: f64, rate: f64) -> RateLimiter {
        RateLimiter::with_clock(
            RateLimiterConfig::single("api", BucketConfig::new(capacity, rate)),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_bucket_refill_saturates() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 2.0, start);
        assert!(bucket.try_consume(10.0));
        assert_eq!(bucket.available(), 0.0);

        bucket.refill(start + Duration::from_secs(2));
        assert_eq!(bucket.available(), 4.0);

        bucket.refill(start + Duration::from_secs(3600));
        assert_eq!(bucket.available(), 10.0);
    }

    #[test]
    fn test_bucket_ignores_time_going_backwards() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(5.0, 1.0, start + Duration::from_secs(10));
        assert!(bucket.try_consume(5.0));
        bucket.refill(start);
        assert_eq!(bucket.available(), 0.0);
    }

    #[test]
    fn test_bucket_wait_time_rounds_up() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3.0, start);
        assert_eq!(bucket.wait_time_ms(1.0), 0);
        assert!(bucket.try_consume(10.0));
        // 1 / 3 s = 333.33ms
        assert_eq!(bucket.wait_time_ms(1.0), 334);
    }

    #[test]
    fn test_bucket_refund_capped() {
        let mut bucket = TokenBucket::new(3.0, 1.0, Instant::now());
        assert!(bucket.try_consume(1.0));
        bucket.refund(5.0);
        assert_eq!(bucket.available(), 3.0);
    }

    #[test]
    fn test_bucket_inexact_rate_earns_whole_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 0.1, start);
        assert!(bucket.try_consume(1.0));
        assert_eq!(bucket.wait_time_ms(1.0), 10_000);

        // one refill per second, as the tick does
        for secs in 1..=10 {
            bucket.refill(start + Duration::from_secs(secs));
        }
        assert_eq!(bucket.wait_time_ms(1.0), 0);
        assert!(bucket.try_consume(1.0));
        assert!(bucket.available() >= 0.0);
    }

    #[test]
    fn test_bucket_many_small_refills_do_not_drift() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(100.0, 1.67, start);
        assert!(bucket.try_consume(100.0));

        for ms in (10..=60_000).step_by(10) {
            bucket.refill(start + Duration::from_millis(ms));
        }
        // 60s * 1.67/s overflows the bucket
        assert_eq!(bucket.available(), 100.0);

        let mut bucket = TokenBucket::new(100.0, 1.67, start);
        assert!(bucket.try_consume(100.0));
        for ms in (7..=30_000).step_by(7) {
            bucket.refill(start + Duration::from_millis(ms));
        }
        let expected = 29.995 * 1.67;
        assert!((bucket.available() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 10.0, 1.0);

        let err = limiter.acquire("speech", 1).unwrap_err();
        assert_eq!(err, Error::UnknownCategory("speech".to_string()));
        assert!(limiter.status("speech").is_err());
        assert!(limiter.try_acquire("speech", 1).is_err());
        assert_eq!(limiter.stats().rejected, 2);
    }

    #[test]
    fn test_oversize_request_rejected() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 10.0, 1.0);
        assert!(matches!(
            limiter.acquire("api", 11),
            Err(Error::ExceedsCapacity { requested: 11, .. })
        ));
    }

    #[test]
    fn test_zero_count_always_granted() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 1.0, 1.0);
        assert!(limiter.acquire("api", 1).unwrap().is_granted());
        assert!(limiter.acquire("api", 0).unwrap().is_granted());
    }

    #[test]
    fn test_grant_then_defer() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 10.0, 1.0);

        assert!(limiter.acquire("api", 10).unwrap().is_granted());
        match limiter.acquire("api", 1).unwrap() {
            Acquire::Deferred(d) => {
                assert_eq!(d.category(), "api");
                assert_eq!(d.count(), 1);
                assert_eq!(d.wait_time_ms(), 1000);
            }
            Acquire::Granted => panic!("bucket should be empty"),
        }

        let stats = limiter.stats();
        assert_eq!(stats.granted, 1);
        assert_eq!(stats.deferred, 1);
    }

    #[test]
    fn test_wait_time_accounts_for_queue_ahead() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 4.0, 2.0);
        assert!(limiter.acquire("api", 4).unwrap().is_granted());

        let Acquire::Deferred(first) = limiter.acquire("api", 2).unwrap() else {
            panic!("expected deferral");
        };
        let Acquire::Deferred(second) = limiter.acquire("api", 2).unwrap() else {
            panic!("expected deferral");
        };
        assert_eq!(first.wait_time_ms(), 1000);
        assert_eq!(second.wait_time_ms(), 2000);
    }

    #[test]
    fn test_new_request_does_not_overtake_waiter() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 5.0, 1.0);
        assert!(limiter.acquire("api", 4).unwrap().is_granted());

        // 1 token left; a 3-token waiter queues
        let big = limiter.acquire("api", 3).unwrap();
        assert!(!big.is_granted());

        // a 1-token request would fit alone but must queue behind it
        let small = limiter.acquire("api", 1).unwrap();
        assert!(!small.is_granted());
        assert!(!limiter.try_acquire("api", 1).unwrap());
        assert_eq!(limiter.status("api").unwrap().queued_waiters, 2);
    }

    #[test]
    fn test_status_snapshot() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 10.0, 2.0);
        assert!(limiter.acquire("api", 9).unwrap().is_granted());

        clock.advance(Duration::from_millis(250));
        let status = limiter.status("api").unwrap();
        assert_eq!(status.available_tokens, 1);
        assert_eq!(status.capacity, 10.0);
        assert_eq!(status.refill_rate_per_second, 2.0);
        assert_eq!(status.wait_time_for_next_token_ms, 0);
        assert_eq!(status.queued_waiters, 0);

        assert!(limiter.acquire("api", 1).unwrap().is_granted());
        let status = limiter.status("api").unwrap();
        assert_eq!(status.available_tokens, 0);
        assert_eq!(status.wait_time_for_next_token_ms, 250);
    }

    #[tokio::test]
    async fn test_tick_admits_in_fifo_order() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 2.0, 1.0);
        assert!(limiter.acquire("api", 2).unwrap().is_granted());

        let Acquire::Deferred(a) = limiter.acquire("api", 1).unwrap() else {
            panic!("expected deferral");
        };
        let Acquire::Deferred(b) = limiter.acquire("api", 1).unwrap() else {
            panic!("expected deferral");
        };

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.tick(), 1);
        a.await.unwrap();
        assert_eq!(limiter.status("api").unwrap().queued_waiters, 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.tick(), 1);
        b.await.unwrap();
        assert_eq!(limiter.stats().admitted, 2);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_keeps_tokens() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 1.0, 1.0);
        assert!(limiter.acquire("api", 1).unwrap().is_granted());

        let abandoned = limiter.acquire("api", 1).unwrap();
        drop(abandoned);

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.tick(), 0);
        assert_eq!(limiter.status("api").unwrap().available_tokens, 1);
        assert_eq!(limiter.status("api").unwrap().queued_waiters, 0);
    }

    #[tokio::test]
    async fn test_dropped_limiter_fails_waiter() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, 1.0, 1.0);
        assert!(limiter.acquire("api", 1).unwrap().is_granted());
        let deferred = limiter.acquire("api", 1).unwrap();
        drop(limiter);
        assert_eq!(
            deferred.admitted().await,
            Err(Error::LimiterDropped("api".to_string()))
        );
    }

    #[tokio::test]
    async fn test_refill_task_drives_ticks() {
        let clock = ManualClock::new();
        let limiter = Arc::new(limiter(&clock, 1.0, 1.0));
        let task = limiter.start_refill(Arc::new(clock.clone()));

        assert!(limiter.acquire("api", 1).unwrap().is_granted());
        let deferred = limiter.acquire("api", 1).unwrap();

        clock.advance(Duration::from_secs(1));
        deferred.admitted().await.unwrap();
        assert_eq!(clock.pending_timers(), 1);

        task.stop();
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = RateLimiterStats {
            granted: 3,
            deferred: 2,
            admitted: 1,
            rejected: 0,
        };
        assert_eq!(
            stats.to_string(),
            "RateLimiter(3 granted, 2 deferred, 1 admitted, 0 rejected)"
        );
    }
}
