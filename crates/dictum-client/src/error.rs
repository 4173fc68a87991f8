pub use dictum_core::Severity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Outbound queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the same operation may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::QueueFull { .. })
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::ConnectionClosed | Error::Transport(_) => Severity::High,
            Error::MalformedMessage(_) | Error::QueueFull { .. } => Severity::Medium,
            Error::Serialization(_) | Error::InvalidConfig(_) => Severity::Low,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::transport("reset by peer").is_retryable());
        assert!(Error::QueueFull { capacity: 8 }.is_retryable());
        assert!(!Error::ConnectionClosed.is_retryable());
        assert!(!Error::MalformedMessage("eof".into()).is_retryable());
    }

    #[test]
    fn test_severity() {
        assert_eq!(Error::transport("x").severity(), Severity::High);
        assert_eq!(Error::ConnectionClosed.severity(), Severity::High);
        assert_eq!(
            Error::MalformedMessage("x".into()).severity(),
            Severity::Medium
        );
        assert_eq!(Error::config("x").severity(), Severity::Low);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::QueueFull { capacity: 4 }.to_string(),
            "Outbound queue full (capacity: 4)"
        );
        assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
    }
}
