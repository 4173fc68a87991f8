//! Dictum core: rate limiting and time primitives
//!
//! - [`rate_limiter`]: token buckets grouped into named categories, with a
//!   FIFO of suspended requests per category
//! - [`clock`]: injectable clock and one-shot scheduler, including a virtual
//!   clock for deterministic tests
//! - [`config`]: serde-friendly bucket and limiter configuration
//!
//! # Example
//!
//! ```no_run
//! use dictum_core::{Acquire, RateLimiter, RateLimiterConfig};
//!
//! # async fn run() -> dictum_core::Result<()> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default())?;
//! match limiter.acquire("voice", 1)? {
//!     Acquire::Granted => println!("go"),
//!     Acquire::Deferred(wait) => {
//!         println!("retry in {}ms", wait.wait_time_ms());
//!         wait.await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod rate_limiter;

pub use clock::{Clock, ManualClock, Scheduler, SystemClock, TimerCallback, TimerHandle, TokioScheduler};
pub use config::{BucketConfig, RateLimiterConfig, API_CATEGORY, VOICE_CATEGORY};
pub use error::{Error, Result, Severity};
pub use rate_limiter::{
    Acquire, BucketStatus, RateLimitDeferred, RateLimiter, RateLimiterStats, RefillTask,
    TokenBucket,
};
