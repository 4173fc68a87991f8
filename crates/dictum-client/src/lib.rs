//! Dictum client: a resilient, message-queuing duplex connection
//!
//! [`ConnectionManager`] hides transient disconnects from callers. Frames sent
//! while the transport is down are queued and replayed in order once it is
//! back, and reconnection follows a configurable [`ReconnectPolicy`].
//!
//! The manager performs no I/O of its own: a [`TransportFactory`] opens the
//! transports and a `dictum_core::Scheduler` runs its timers. The
//! `websocket` feature (on by default) provides [`WebSocketTransportFactory`].

pub mod connection;
pub mod credentials;
pub mod error;
pub mod message;
pub mod reconnect;
pub mod testing;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{
    ConnectionConfig, ConnectionConfigBuilder, ConnectionManager, ConnectionState,
    ConnectionStats, DEFAULT_ORIGIN,
};
pub use credentials::{StaticTokenProvider, TokenProvider};
pub use error::{Error, Result, Severity};
pub use message::Message;
pub use reconnect::ReconnectPolicy;
pub use transport::{Transport, TransportEvents, TransportFactory, TransportOptions};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};
