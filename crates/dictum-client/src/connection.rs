//! Resilient duplex connection with queuing and automatic reconnection
//!
//! # Features
//!
//! - **Transparent queuing**: frames sent while not connected are queued and
//!   flushed in submission order once the transport opens
//! - **Automatic reconnection**: fixed delay or exponential backoff with
//!   jitter, bounded by an optional attempt budget
//! - **Typed dispatch**: inbound frames are routed by their `type` field
//! - **Ordered events**: lifecycle handlers see transitions in order, never
//!   while an internal lock is held
//! - **Deterministic**: transport, clock and scheduler are injected
//!
//! # Example
//!
//! ```rust,ignore
//! use dictum_client::{ConnectionConfig, ConnectionManager, WebSocketTransportFactory};
//! use dictum_core::TokioScheduler;
//!
//! let config = ConnectionConfig::builder()
//!     .url("ws://localhost:8765")
//!     .max_reconnect_attempts(Some(5))
//!     .build();
//!
//! let manager = ConnectionManager::new(
//!     config,
//!     Arc::new(WebSocketTransportFactory::current()),
//!     Arc::new(TokioScheduler::current()),
//! )?;
//!
//! manager.on_message("transcript", |msg| println!("{:?}", msg));
//! manager.connect()?;
//! manager.send(&serde_json::json!({"type": "ping"}))?;
//! ```

use crate::credentials::TokenProvider;
use crate::error::{Error, Result};
use crate::message::{encode_frame, Message};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{
    EventSink, Transport, TransportEvents, TransportFactory, TransportOptions,
    DEFAULT_CONNECT_TIMEOUT,
};
use bytes::Bytes;
use dictum_core::{Scheduler, TimerHandle};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Origin presented to the server unless configured otherwise
pub const DEFAULT_ORIGIN: &str = "https://docs.google.com";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Endpoint to connect to
    pub url: String,
    /// Delay policy between reconnection attempts
    pub reconnect: ReconnectPolicy,
    /// Consecutive failed attempts tolerated before closing (None = unlimited)
    pub max_reconnect_attempts: Option<u32>,
    /// Upper bound on queued outbound frames (None = unbounded)
    pub max_queue_len: Option<usize>,
    /// `Origin` header sent with every connection attempt
    pub origin: Option<String>,
    /// Additional headers sent with every connection attempt
    pub headers: Vec<(String, String)>,
    /// Transport handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            reconnect: ReconnectPolicy::default(),
            max_reconnect_attempts: Some(10),
            max_queue_len: None,
            origin: Some(DEFAULT_ORIGIN.to_string()),
            headers: Vec::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    /// Create a new builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::config("url must not be empty"));
        }
        if self.max_queue_len == Some(0) {
            return Err(Error::config("max_queue_len must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::config("connect timeout must be greater than zero"));
        }
        self.reconnect.validate()
    }
}

/// Builder for ConnectionConfig
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn max_queue_len(mut self, len: Option<usize>) -> Self {
        self.config.max_queue_len = len;
        self
    }

    pub fn origin(mut self, origin: Option<String>) -> Self {
        self.config.origin = origin;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a [`ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: a fresh manager is needed to connect again
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// One slot per lifecycle event plus one per message type
#[derive(Default)]
struct Handlers {
    open: Option<Callback>,
    close: Option<Callback>,
    error: Option<ErrorCallback>,
    state_change: Option<StateCallback>,
    messages: HashMap<String, MessageCallback>,
}

/// Lifecycle notifications queued under the lock, delivered after it
enum Notification {
    StateChange(ConnectionState, ConnectionState),
    Open,
    Close,
    Error(Error),
}

struct Shared {
    state: ConnectionState,
    url: String,
    queue: VecDeque<Bytes>,
    reconnect_attempt: u32,
    /// Bumped on every attempt and teardown; stale events carry an old value
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    reconnect_timer: Option<TimerHandle>,
    /// Notifications waiting for [`Inner::deliver`], in transition order
    outbox: VecDeque<Notification>,
    delivering: bool,
}

#[derive(Debug, Default)]
struct Counters {
    transports_opened: AtomicU64,
    reconnects: AtomicU64,
    frames_sent: AtomicU64,
    frames_queued: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// Connection statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    /// Transports requested from the factory
    pub transports_opened: u64,
    /// Scheduled reconnection attempts that ran
    pub reconnects: u64,
    pub frames_sent: u64,
    /// Frames that had to wait in the queue
    pub frames_queued: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    /// Frames waiting right now
    pub queue_len: usize,
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection({}, {} opened, {} reconnects, {} sent, {} queued, {} received, {} malformed, {} waiting)",
            self.state,
            self.transports_opened,
            self.reconnects,
            self.frames_sent,
            self.frames_queued,
            self.frames_received,
            self.malformed_frames,
            self.queue_len
        )
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Maintains one logical duplex connection over an unreliable transport
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    me: Weak<Inner>,
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    scheduler: Arc<dyn Scheduler>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    shared: Mutex<Shared>,
    handlers: RwLock<Handlers>,
    counters: Counters,
}

impl ConnectionManager {
    /// Create a manager in the Disconnected state
    pub fn new(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        Self::with_token_provider(config, factory, scheduler, None)
    }

    /// Create a manager that attaches a bearer token to every connection attempt
    pub fn with_token_provider(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        scheduler: Arc<dyn Scheduler>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                url: config.url.clone(),
                queue: VecDeque::new(),
                reconnect_attempt: 0,
                generation: 0,
                transport: None,
                reconnect_timer: None,
                outbox: VecDeque::new(),
                delivering: false,
            }),
            config,
            factory,
            scheduler,
            token_provider,
            handlers: RwLock::new(Handlers::default()),
            counters: Counters::default(),
        });

        Ok(Self { inner })
    }

    /// Start connecting
    ///
    /// A no-op while Connecting or Connected. While Reconnecting the pending
    /// retry is cancelled and a new attempt starts now. Fails once Closed.
    pub fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Serialize `message` and transmit it, or queue it until connected
    ///
    /// The message must serialize to a JSON object with a string `type`.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let frame = encode_frame(message)?;
        self.inner.send_frame(frame)
    }

    /// Tear down the transport, cancel pending retries and enter Closed
    ///
    /// Queued frames are dropped. Calling it again has no effect.
    pub fn close(&self) {
        self.inner.close()
    }

    /// Point later connection attempts at a different endpoint
    ///
    /// The current transport, if any, is left alone.
    pub fn reconfigure(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::config("url must not be empty"));
        }
        let mut shared = self.inner.shared.lock();
        if shared.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }
        info!("Connection endpoint changed from {} to {}", shared.url, url);
        shared.url = url;
        Ok(())
    }

    /// Register the handler called once the transport opens
    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.write().open = Some(Arc::new(handler));
    }

    /// Register the handler called when an established connection ends
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.write().close = Some(Arc::new(handler));
    }

    /// Register the handler for transport failures and malformed frames
    pub fn on_error(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.handlers.write().error = Some(Arc::new(handler));
    }

    /// Register the handler called with `(old, new)` on every transition
    ///
    /// Transitions are reported one at a time in the order they happened,
    /// even when several threads drive the connection. The handler may run
    /// on whichever thread is already delivering, after the triggering call
    /// has returned.
    pub fn on_state_change(
        &self,
        handler: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) {
        self.inner.handlers.write().state_change = Some(Arc::new(handler));
    }

    /// Register the handler for inbound messages of type `kind`
    ///
    /// Replaces any handler previously registered for the same type.
    pub fn on_message(
        &self,
        kind: impl Into<String>,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) {
        self.inner
            .handlers
            .write()
            .messages
            .insert(kind.into(), Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Frames waiting for a connected transport
    pub fn queued_len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    /// Consecutive failed attempts since the last successful open
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.shared.lock().reconnect_attempt
    }

    pub fn url(&self) -> String {
        self.inner.shared.lock().url.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ConnectionStats {
        let (state, queue_len) = {
            let shared = self.inner.shared.lock();
            (shared.state, shared.queue.len())
        };
        let c = &self.inner.counters;
        ConnectionStats {
            state,
            transports_opened: c.transports_opened.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_queued: c.frames_queued.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
            queue_len,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &shared.url)
            .field("state", &shared.state)
            .field("queued", &shared.queue.len())
            .field("reconnect_attempt", &shared.reconnect_attempt)
            .finish()
    }
}

impl Inner {
    fn connect(&self) -> Result<()> {
        let (generation, url) = {
            let mut shared = self.shared.lock();
            match shared.state {
                ConnectionState::Closed => return Err(Error::ConnectionClosed),
                ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
                ConnectionState::Reconnecting => {
                    if let Some(timer) = shared.reconnect_timer.take() {
                        timer.cancel();
                    }
                }
                ConnectionState::Disconnected => {}
            }
            self.begin_attempt(&mut shared)
        };
        self.deliver();
        self.open_transport(generation, url);
        Ok(())
    }

    fn begin_attempt(&self, shared: &mut Shared) -> (u64, String) {
        shared.generation += 1;
        transition(shared, ConnectionState::Connecting);
        (shared.generation, shared.url.clone())
    }

    fn transport_options(&self) -> TransportOptions {
        let mut headers = Vec::with_capacity(self.config.headers.len() + 1);
        if let Some(origin) = &self.config.origin {
            headers.push(("Origin".to_string(), origin.clone()));
        }
        headers.extend(self.config.headers.iter().cloned());

        TransportOptions {
            headers,
            bearer_token: self.token_provider.as_ref().and_then(|p| p.bearer_token()),
            connect_timeout: self.config.connect_timeout(),
        }
    }

    /// Construct the transport for attempt `generation`, outside the lock
    fn open_transport(&self, generation: u64, url: String) {
        let sink: Weak<dyn EventSink> = self.me.clone();
        let events = TransportEvents::new(sink, generation);
        let options = self.transport_options();

        debug!("Opening transport to {} (attempt generation {})", url, generation);
        self.counters.transports_opened.fetch_add(1, Ordering::Relaxed);

        let opened = self.factory.open(&url, &options, events);

        {
            let mut shared = self.shared.lock();
            let current = shared.generation == generation
                && matches!(
                    shared.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                );

            match opened {
                Ok(transport) => {
                    let transport: Arc<dyn Transport> = Arc::from(transport);
                    if !current {
                        drop(shared);
                        debug!("Discarding transport for superseded attempt {}", generation);
                        transport.close();
                        return;
                    }
                    shared.transport = Some(transport);
                    // the open event may have raced ahead of the factory returning
                    if shared.state == ConnectionState::Connected {
                        self.flush(&mut shared);
                    }
                }
                Err(err) => {
                    if current {
                        error!("Failed to open transport to {}: {}", url, err);
                        self.fail(&mut shared, Some(err));
                    }
                }
            }
        }
        self.deliver();
    }

    /// Drain the queue in order; on a send failure the frame goes back to the
    /// front and the connection is failed
    fn flush(&self, shared: &mut Shared) {
        let Some(transport) = shared.transport.clone() else {
            return;
        };
        let pending = shared.queue.len();
        while let Some(frame) = shared.queue.pop_front() {
            if let Err(err) = transport.send(frame.clone()) {
                shared.queue.push_front(frame);
                error!("Transport send failed while flushing queue: {}", err);
                self.fail(shared, Some(err));
                return;
            }
            self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        if pending > 0 {
            debug!("Flushed {} queued frames", pending);
        }
    }

    fn send_frame(&self, frame: Bytes) -> Result<()> {
        let result = {
            let mut shared = self.shared.lock();
            match shared.state {
                ConnectionState::Closed => Err(Error::ConnectionClosed),
                ConnectionState::Connected if shared.transport.is_some() => {
                    shared.queue.push_back(frame);
                    self.flush(&mut shared);
                    Ok(())
                }
                _ => {
                    if let Some(capacity) = self.config.max_queue_len {
                        if shared.queue.len() >= capacity {
                            warn!("Outbound queue full ({} frames), rejecting send", capacity);
                            return Err(Error::QueueFull { capacity });
                        }
                    }
                    shared.queue.push_back(frame);
                    self.counters.frames_queued.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Queued frame while {} ({} waiting)",
                        shared.state,
                        shared.queue.len()
                    );
                    Ok(())
                }
            }
        };
        self.deliver();
        result
    }

    /// Drop the current transport and either schedule a retry or give up
    fn fail(&self, shared: &mut Shared, err: Option<Error>) {
        let was_connected = shared.state == ConnectionState::Connected;

        shared.generation += 1;
        if let Some(transport) = shared.transport.take() {
            transport.close();
        }
        if let Some(err) = err {
            shared.outbox.push_back(Notification::Error(err));
        }
        if was_connected {
            shared.outbox.push_back(Notification::Close);
        }

        let attempt = shared.reconnect_attempt + 1;
        if self
            .config
            .max_reconnect_attempts
            .is_some_and(|max| attempt > max)
        {
            warn!(
                "Giving up on {} after {} reconnection attempts, dropping {} queued frames",
                shared.url,
                attempt - 1,
                shared.queue.len()
            );
            shared.queue.clear();
            transition(shared, ConnectionState::Closed);
            return;
        }

        shared.reconnect_attempt = attempt;
        let delay = self.config.reconnect.delay_for(attempt);
        transition(shared, ConnectionState::Reconnecting);

        let me = self.me.clone();
        let generation = shared.generation;
        info!(
            "Reconnecting to {} in {:?} (attempt {})",
            shared.url, delay, attempt
        );
        shared.reconnect_timer = Some(self.scheduler.schedule_once(
            delay,
            Box::new(move || {
                if let Some(inner) = me.upgrade() {
                    inner.retry(generation);
                }
            }),
        ));
    }

    fn retry(&self, generation: u64) {
        let (generation, url) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Reconnecting {
                return;
            }
            shared.reconnect_timer = None;
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            self.begin_attempt(&mut shared)
        };
        self.deliver();
        self.open_transport(generation, url);
    }

    fn close(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.state == ConnectionState::Closed {
                return;
            }
            let was_connected = shared.state == ConnectionState::Connected;

            if let Some(timer) = shared.reconnect_timer.take() {
                timer.cancel();
            }
            shared.generation += 1;
            if let Some(transport) = shared.transport.take() {
                transport.close();
            }
            if !shared.queue.is_empty() {
                debug!("Dropping {} queued frames on close", shared.queue.len());
                shared.queue.clear();
            }
            if was_connected {
                shared.outbox.push_back(Notification::Close);
            }
            transition(&mut shared, ConnectionState::Closed);
            info!("Connection to {} closed", shared.url);
        }
        self.deliver();
    }

    fn dispatch_frame(&self, frame: &[u8]) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                self.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding malformed inbound frame: {}", err);
                self.shared.lock().outbox.push_back(Notification::Error(err));
                self.deliver();
                return;
            }
        };

        let handler = self.handlers.read().messages.get(&message.kind).cloned();
        match handler {
            Some(handler) => handler(message),
            None => debug!("No handler registered for message type '{}'", message.kind),
        }
    }

    /// Run handlers for queued notifications with no lock held
    ///
    /// One thread delivers at a time, in the order the notifications were
    /// queued. A call that finds delivery already underway leaves its
    /// notifications to that thread.
    fn deliver(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.delivering || shared.outbox.is_empty() {
                return;
            }
            shared.delivering = true;
        }
        let _guard = DeliveryGuard(self);

        loop {
            let note = {
                let mut shared = self.shared.lock();
                match shared.outbox.pop_front() {
                    Some(note) => note,
                    None => {
                        shared.delivering = false;
                        return;
                    }
                }
            };
            self.run_handler(note);
        }
    }

    fn run_handler(&self, note: Notification) {
        match note {
            Notification::StateChange(old, new) => {
                let handler = self.handlers.read().state_change.clone();
                if let Some(handler) = handler {
                    handler(old, new);
                }
            }
            Notification::Open => {
                let handler = self.handlers.read().open.clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
            Notification::Close => {
                let handler = self.handlers.read().close.clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
            Notification::Error(err) => {
                let handler = self.handlers.read().error.clone();
                match handler {
                    Some(handler) => handler(&err),
                    None => debug!("Unhandled connection error ({}): {}", err.severity(), err),
                }
            }
        }
    }
}

/// Hands delivery back if a handler panics
struct DeliveryGuard<'a>(&'a Inner);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.shared.lock().delivering = false;
        }
    }
}

impl EventSink for Inner {
    fn on_opened(&self, generation: u64) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connecting {
                return;
            }
            shared.reconnect_attempt = 0;
            transition(&mut shared, ConnectionState::Connected);
            info!("Connected to {}", shared.url);
            self.flush(&mut shared);
            // a failed flush already moved on to the next attempt
            if shared.state == ConnectionState::Connected {
                shared.outbox.push_back(Notification::Open);
            }
        }
        self.deliver();
    }

    fn on_frame(&self, generation: u64, frame: Bytes) {
        if self.shared.lock().generation != generation {
            return;
        }
        self.dispatch_frame(&frame);
    }

    fn on_closed(&self, generation: u64) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            info!("Transport to {} closed while {}", shared.url, shared.state);
            self.fail(&mut shared, None);
        }
        self.deliver();
    }

    fn on_error(&self, generation: u64, err: Error) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            error!("Transport to {} failed: {}", shared.url, err);
            self.fail(&mut shared, Some(err));
        }
        self.deliver();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        if let Some(timer) = shared.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(transport) = shared.transport.take() {
            transport.close();
        }
    }
}

fn transition(shared: &mut Shared, next: ConnectionState) {
    let previous = shared.state;
    if previous == next {
        return;
    }
    shared.state = next;
    debug!("Connection state {} -> {}", previous, next);
    shared.outbox.push_back(Notification::StateChange(previous, next));
}
