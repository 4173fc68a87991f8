//! Transport boundary
//!
//! The connection manager never performs I/O itself. A [`TransportFactory`]
//! opens one [`Transport`] per connection attempt and reports lifecycle
//! events back through the [`TransportEvents`] handle it was given.

use crate::error::{Error, Result};
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

/// Default timeout for establishing a transport
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options passed to the factory for every connection attempt
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Extra request headers (`Origin` and the like)
    pub headers: Vec<(String, String)>,
    /// Bearer token sent as `Authorization`
    pub bearer_token: Option<SecretString>,
    /// Upper bound on the opening handshake
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            bearer_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TransportOptions {
    /// Look up a header, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Authorization` header value, if a token is present
    pub fn authorization(&self) -> Option<String> {
        self.bearer_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }
}

/// One open (or opening) duplex byte channel
///
/// Implementations must not report events synchronously from inside
/// [`send`](Transport::send) or [`close`](Transport::close).
pub trait Transport: Send + Sync {
    /// Queue one frame for transmission
    fn send(&self, frame: Bytes) -> Result<()>;

    /// Tear the transport down; no further events are delivered
    fn close(&self);
}

/// Opens transports on behalf of the connection manager
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        url: &str,
        options: &TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn Transport>>;
}

/// Receiver side of [`TransportEvents`]
pub(crate) trait EventSink: Send + Sync {
    fn on_opened(&self, generation: u64);
    fn on_frame(&self, generation: u64, frame: Bytes);
    fn on_closed(&self, generation: u64);
    fn on_error(&self, generation: u64, error: Error);
}

/// Handle a transport uses to report its lifecycle
///
/// Each handle is bound to a single connection attempt. Events from an
/// attempt the manager has moved past are ignored, as are events delivered
/// after the manager was dropped.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Weak<dyn EventSink>,
    generation: u64,
}

impl TransportEvents {
    pub(crate) fn new(sink: Weak<dyn EventSink>, generation: u64) -> Self {
        Self { sink, generation }
    }

    /// The transport finished its handshake
    pub fn opened(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_opened(self.generation);
        }
    }

    /// One inbound frame arrived
    pub fn message(&self, frame: Bytes) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_frame(self.generation, frame);
        }
    }

    /// The peer or the network closed the transport
    pub fn closed(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_closed(self.generation);
        }
    }

    /// The transport failed
    pub fn error(&self, error: Error) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_error(self.generation, error);
        }
    }

    /// Connection attempt this handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .field("attached", &(self.sink.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let options = TransportOptions {
            headers: vec![("Origin".into(), "https://docs.google.com".into())],
            ..Default::default()
        };
        assert_eq!(options.header("origin"), Some("https://docs.google.com"));
        assert_eq!(options.header("x-missing"), None);
    }

    #[test]
    fn test_authorization_header() {
        let options = TransportOptions {
            bearer_token: Some(SecretString::from("abc123".to_string())),
            ..Default::default()
        };
        assert_eq!(options.authorization().as_deref(), Some("Bearer abc123"));
        assert!(!format!("{:?}", options).contains("abc123"));
        assert_eq!(TransportOptions::default().authorization(), None);
    }
}
