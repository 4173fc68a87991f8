use std::fmt;
use thiserror::Error;

/// How loudly an error should be surfaced to operators and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Caller mistakes and other conditions that need no operator attention
    Low,
    /// Degraded behaviour that recovers on its own
    Medium,
    /// Loss of connectivity or upstream failures
    High,
    /// Conditions that end the process
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unknown rate limit category: {0}")]
    UnknownCategory(String),

    #[error("Request for {requested} tokens exceeds capacity {capacity} of category '{category}'")]
    ExceedsCapacity {
        category: String,
        requested: u32,
        capacity: f64,
    },

    #[error("Rate limiter dropped before admitting waiter in category '{0}'")]
    LimiterDropped(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// None of the rate limiter errors succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::UnknownCategory(_) | Error::ExceedsCapacity { .. } | Error::InvalidConfig(_) => {
                Severity::Low
            }
            Error::LimiterDropped(_) => Severity::Medium,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownCategory("speech".to_string());
        assert_eq!(err.to_string(), "Unknown rate limit category: speech");

        let err = Error::ExceedsCapacity {
            category: "api".to_string(),
            requested: 200,
            capacity: 100.0,
        };
        assert_eq!(
            err.to_string(),
            "Request for 200 tokens exceeds capacity 100 of category 'api'"
        );
    }

    #[test]
    fn test_caller_bugs_are_low_severity() {
        assert_eq!(
            Error::UnknownCategory("x".into()).severity(),
            Severity::Low
        );
        assert_eq!(Error::config("bad").severity(), Severity::Low);
        assert_eq!(
            Error::LimiterDropped("voice".into()).severity(),
            Severity::Medium
        );
        assert!(!Error::UnknownCategory("x".into()).is_retryable());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::High.to_string(), "HIGH");
    }
}
