//! Time sources and one-shot timers
//!
//! Components that read the current time take a [`Clock`], and components
//! that need something to happen later take a [`Scheduler`]. Production code
//! uses [`SystemClock`] and [`TokioScheduler`]. Tests use [`ManualClock`],
//! which implements both over virtual time that only moves when
//! [`ManualClock::advance`] is called.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Callback run once when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Runs callbacks after a delay.
///
/// Implementations must never run the callback synchronously from inside
/// `schedule_once`, callers are allowed to hold locks while scheduling.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Handle to a scheduled callback.
///
/// Dropping the handle does not cancel the timer.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Cancel the timer. Once this returns the callback will not start.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Wall clock
// ============================================================================

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Scheduler that runs each callback on its own tokio task.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                callback();
            }
        });
        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

// ============================================================================
// Virtual time
// ============================================================================

struct ManualTimer {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    timers: Vec<ManualTimer>,
}

struct ManualInner {
    origin: Instant,
    state: Mutex<ManualState>,
}

/// Deterministic clock and scheduler for tests.
///
/// Time starts at the instant the clock was created and moves only through
/// [`advance`](Self::advance). Timers fire in due order, ties broken by the
/// order they were scheduled in. Callbacks run on the thread calling
/// `advance`, outside the clock's internal lock, so they may schedule
/// further timers.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualInner {
                origin: Instant::now(),
                state: Mutex::new(ManualState {
                    elapsed: Duration::ZERO,
                    next_seq: 0,
                    timers: Vec::new(),
                }),
            }),
        }
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().elapsed
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending_timers(&self) -> usize {
        self.inner
            .state
            .lock()
            .timers
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Move virtual time forward, firing every timer that falls due.
    ///
    /// Returns the number of callbacks that ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.inner.state.lock().elapsed + by;
        let mut fired = 0;

        loop {
            let timer = {
                let mut state = self.inner.state.lock();
                state.timers.retain(|t| !t.cancelled.load(Ordering::Acquire));

                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(idx, _)| idx);

                match next {
                    Some(idx) => {
                        let timer = state.timers.swap_remove(idx);
                        if timer.due > state.elapsed {
                            state.elapsed = timer.due;
                        }
                        timer
                    }
                    None => {
                        state.elapsed = target;
                        break;
                    }
                }
            };

            if !timer.cancelled.load(Ordering::Acquire) {
                (timer.callback)();
                fired += 1;
            }
        }

        fired
    }

    /// Fire timers that are already due without moving time.
    pub fn run_pending(&self) -> usize {
        self.advance(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }
}

impl Scheduler for ManualClock {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.inner.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.elapsed + delay;
        state.timers.push(ManualTimer {
            due,
            seq,
            cancelled: cancelled.clone(),
            callback,
        });
        TimerHandle::new(cancelled, None)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ManualClock")
            .field("elapsed", &state.elapsed)
            .field("timers", &state.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &'static str| -> TimerCallback {
            let log = log_clone.clone();
            Box::new(move || log.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_manual_clock_moves_only_on_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now() - start, Duration::from_millis(1500));
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let clock = ManualClock::new();
        let (log, make) = recorder();

        clock.schedule_once(Duration::from_millis(300), make("c"));
        clock.schedule_once(Duration::from_millis(100), make("a"));
        clock.schedule_once(Duration::from_millis(200), make("b"));
        clock.schedule_once(Duration::from_millis(100), make("a2"));

        assert_eq!(clock.advance(Duration::from_millis(250)), 3);
        assert_eq!(*log.lock(), vec!["a", "a2", "b"]);
        assert_eq!(clock.pending_timers(), 1);

        clock.advance(Duration::from_millis(50));
        assert_eq!(*log.lock(), vec!["a", "a2", "b", "c"]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let clock = ManualClock::new();
        let (log, make) = recorder();

        let handle = clock.schedule_once(Duration::from_millis(10), make("x"));
        handle.cancel();
        assert!(handle.is_cancelled());

        assert_eq!(clock.advance(Duration::from_secs(1)), 0);
        assert!(log.lock().is_empty());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_callback_sees_due_time_and_can_reschedule() {
        let clock = ManualClock::new();
        let start = clock.now();
        let ticks = Arc::new(AtomicUsize::new(0));

        fn tick(clock: ManualClock, ticks: Arc<AtomicUsize>) {
            let next = clock.clone();
            clock.schedule_once(
                Duration::from_millis(100),
                Box::new(move || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tick(next, ticks);
                }),
            );
        }

        tick(clock.clone(), ticks.clone());
        clock.advance(Duration::from_millis(350));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(clock.now() - start, Duration::from_millis(350));
        assert_eq!(clock.pending_timers(), 1);
    }

    #[test]
    fn test_run_pending_fires_zero_delay_timers() {
        let clock = ManualClock::new();
        let (log, make) = recorder();
        clock.schedule_once(Duration::ZERO, make("now"));
        assert_eq!(clock.run_pending(), 1);
        assert_eq!(*log.lock(), vec!["now"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule_once(
            Duration::from_secs(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::time::timeout(Duration::from_secs(6), rx)
            .await
            .expect("timer should fire")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = scheduler.schedule_once(
            Duration::from_millis(100),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
