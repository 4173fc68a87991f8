//! Testing utilities for connection code
//!
//! [`MockTransportFactory`] records every transport it opens and hands the
//! test the matching [`TransportEvents`], so lifecycle events can be driven
//! by hand. Combine it with `dictum_core::ManualClock` to control reconnect
//! timers.
//!
//! # Example
//!
//! ```rust,ignore
//! use dictum_client::testing::MockTransportFactory;
//! use dictum_core::ManualClock;
//!
//! let factory = MockTransportFactory::new();
//! let clock = ManualClock::new();
//! let manager = ConnectionManager::new(config, Arc::new(factory.clone()), Arc::new(clock.clone()))?;
//!
//! manager.connect()?;
//! factory.last_events().unwrap().opened();
//! manager.send(&json!({"type": "ping"}))?;
//! assert_eq!(factory.last_transport().unwrap().sent_json(), vec![json!({"type": "ping"})]);
//! ```

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvents, TransportFactory, TransportOptions};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Mock Transport
// ============================================================================

/// A transport that records outbound frames
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames passed to `send`, in order
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Sent frames parsed as JSON
    ///
    /// # Panics
    ///
    /// Panics if a frame is not valid JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|frame| serde_json::from_slice(frame).expect("sent frame is not JSON"))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every following `send` fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport("mock transport is closed"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::transport("mock send failure"));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Shares one [`MockTransport`] between the factory and the manager
struct SharedTransport(Arc<MockTransport>);

impl Transport for SharedTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        self.0.send(frame)
    }

    fn close(&self) {
        self.0.close()
    }
}

// ============================================================================
// Mock Factory
// ============================================================================

/// One recorded `open` call
#[derive(Debug, Clone)]
pub struct OpenedTransport {
    pub url: String,
    pub options: TransportOptions,
    pub events: TransportEvents,
    pub transport: Arc<MockTransport>,
}

#[derive(Debug, Default)]
struct FactoryState {
    opened: Vec<OpenedTransport>,
    failures: VecDeque<Error>,
}

/// A transport factory that records every `open` call
///
/// Cloning yields a handle to the same recording.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` call fail with `error`
    pub fn fail_next_open(&self, error: Error) {
        self.state.lock().failures.push_back(error);
    }

    /// Number of `open` calls so far, including failed ones
    pub fn open_count(&self) -> usize {
        self.state.lock().opened.len()
    }

    pub fn opened(&self, index: usize) -> Option<OpenedTransport> {
        self.state.lock().opened.get(index).cloned()
    }

    pub fn last_opened(&self) -> Option<OpenedTransport> {
        self.state.lock().opened.last().cloned()
    }

    pub fn events(&self, index: usize) -> Option<TransportEvents> {
        self.opened(index).map(|o| o.events)
    }

    pub fn last_events(&self) -> Option<TransportEvents> {
        self.last_opened().map(|o| o.events)
    }

    pub fn transport(&self, index: usize) -> Option<Arc<MockTransport>> {
        self.opened(index).map(|o| o.transport)
    }

    pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
        self.last_opened().map(|o| o.transport)
    }

    pub fn last_options(&self) -> Option<TransportOptions> {
        self.last_opened().map(|o| o.options)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_opened().map(|o| o.url)
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(
        &self,
        url: &str,
        options: &TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn Transport>> {
        let mut state = self.state.lock();
        let transport = Arc::new(MockTransport::new());
        state.opened.push(OpenedTransport {
            url: url.to_string(),
            options: options.clone(),
            events,
            transport: transport.clone(),
        });
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(Box::new(SharedTransport(transport)))
    }
}
