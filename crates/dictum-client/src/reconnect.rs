use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay before each reconnection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay before every attempt
    Fixed { delay_ms: u64 },

    /// `initial * multiplier^(attempt - 1)`, capped at `max`, with jitter
    ExponentialBackoff {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        /// Fraction of the delay used as jitter (0.2 = ±10%)
        jitter_factor: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::ExponentialBackoff {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::ExponentialBackoff {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Like [`delay_for`](Self::delay_for), drawing jitter from `rng`
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::ExponentialBackoff {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                jitter_factor,
            } => calculate_backoff(
                attempt.saturating_sub(1),
                Duration::from_millis(initial_delay_ms),
                Duration::from_millis(max_delay_ms),
                multiplier,
                jitter_factor,
                rng.gen::<f64>(),
            ),
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if let Self::ExponentialBackoff {
            multiplier,
            jitter_factor,
            ..
        } = *self
        {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(crate::Error::config(format!(
                    "backoff multiplier must be >= 1.0, got {}",
                    multiplier
                )));
            }
            if !(0.0..=1.0).contains(&jitter_factor) {
                return Err(crate::Error::config(format!(
                    "jitter factor must be within 0.0..=1.0, got {}",
                    jitter_factor
                )));
            }
        }
        Ok(())
    }
}

/// Exponential backoff with jitter
///
/// `sample` in `0.0..1.0` places the delay within `±jitter_factor / 2` of the
/// capped base.
fn calculate_backoff(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
    sample: f64,
) -> Duration {
    let base_ms = initial.as_millis() as f64 * multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let capped_ms = base_ms.min(max.as_millis() as f64);

    let jitter_mult = 1.0 + jitter_factor * (sample.clamp(0.0, 1.0) - 0.5);

    Duration::from_millis((capped_ms * jitter_mult).max(0.0).round() as u64)
}
