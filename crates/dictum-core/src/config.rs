use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Category gating spoken commands.
pub const VOICE_CATEGORY: &str = "voice";

/// Category gating outbound API calls.
pub const API_CATEGORY: &str = "api";

/// Capacity and refill rate of a single token bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum tokens the bucket holds (burst size)
    pub capacity: f64,
    /// Tokens added per second of elapsed time
    pub refill_rate_per_second: f64,
}

impl BucketConfig {
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
        }
    }

    /// Bucket that refills `requests` tokens evenly over `window`.
    pub fn per_window(requests: u32, window: Duration) -> Self {
        let capacity = f64::from(requests);
        Self::new(capacity, capacity / window.as_secs_f64())
    }

    fn validate(&self, category: &str) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity < 0.0 {
            return Err(Error::config(format!(
                "category '{}': capacity must be a finite number >= 0, got {}",
                category, self.capacity
            )));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(Error::config(format!(
                "category '{}': refill rate must be a finite number > 0, got {}",
                category, self.refill_rate_per_second
            )));
        }
        Ok(())
    }
}

/// Configuration for the multi-category rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Fixed set of categories, keyed by name
    pub categories: BTreeMap<String, BucketConfig>,

    /// Interval of the background refill tick in milliseconds
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

fn default_refill_interval_ms() -> u64 {
    1000
}

impl Default for RateLimiterConfig {
    /// Voice commands: 60 tokens refilled at one per second.
    /// API calls: 100 tokens refilled at 100 per minute.
    fn default() -> Self {
        Self::empty()
            .with_category(VOICE_CATEGORY, BucketConfig::new(60.0, 1.0))
            .with_category(API_CATEGORY, BucketConfig::new(100.0, 1.67))
    }
}

impl RateLimiterConfig {
    /// Configuration with no categories
    pub fn empty() -> Self {
        Self {
            categories: BTreeMap::new(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }

    /// Configuration with exactly one category
    pub fn single(category: impl Into<String>, bucket: BucketConfig) -> Self {
        Self::empty().with_category(category, bucket)
    }

    /// Add or replace a category
    pub fn with_category(mut self, category: impl Into<String>, bucket: BucketConfig) -> Self {
        self.categories.insert(category.into(), bucket);
        self
    }

    /// Set the refill tick interval
    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Check every bucket and the tick interval
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(Error::config("at least one category must be configured"));
        }
        if self.refill_interval_ms == 0 {
            return Err(Error::config("refill interval must be greater than zero"));
        }
        for (name, bucket) in &self.categories {
            if name.is_empty() {
                return Err(Error::config("category names must not be empty"));
            }
            bucket.validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.categories.len(), 2);
        assert_eq!(
            config.categories[VOICE_CATEGORY],
            BucketConfig::new(60.0, 1.0)
        );
        assert_eq!(config.categories[API_CATEGORY], BucketConfig::new(100.0, 1.67));
        assert_eq!(config.refill_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = RateLimiterConfig::single("api", BucketConfig::new(10.0, 1.0))
            .with_refill_interval(Duration::from_millis(250));

        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.refill_interval_ms, 250);
    }

    #[test]
    fn test_per_window() {
        let bucket = BucketConfig::per_window(120, Duration::from_secs(60));
        assert_eq!(bucket.capacity, 120.0);
        assert!((bucket.refill_rate_per_second - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation_rejects_bad_buckets() {
        let zero_rate = RateLimiterConfig::single("api", BucketConfig::new(10.0, 0.0));
        assert!(matches!(zero_rate.validate(), Err(Error::InvalidConfig(_))));

        let negative = RateLimiterConfig::single("api", BucketConfig::new(-1.0, 1.0));
        assert!(negative.validate().is_err());

        let nan = RateLimiterConfig::single("api", BucketConfig::new(f64::NAN, 1.0));
        assert!(nan.validate().is_err());

        assert!(RateLimiterConfig::empty().validate().is_err());

        let no_tick = RateLimiterConfig::default().with_refill_interval(Duration::ZERO);
        assert!(no_tick.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_default_interval() {
        let json = r#"{"categories":{"voice":{"capacity":5.0,"refill_rate_per_second":0.5}}}"#;
        let config: RateLimiterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.refill_interval_ms, 1000);
        assert_eq!(config.categories["voice"].capacity, 5.0);
    }
}
