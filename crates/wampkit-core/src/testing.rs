//! Test doubles for pipeline stages
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `test-utils` feature.
//!
//! ```ignore
//! use wampkit_core::testing::{MockConnection, RecordingMiddleware};
//!
//! let (recorder, log) = RecordingMiddleware::new();
//! let mut stage = MyStage::new(Box::new(recorder));
//! let connection: ConnectionRef = Arc::new(MockConnection::new());
//! stage.on_open(&connection)?;
//! assert_eq!(log.events().len(), 1);
//! ```

use crate::attributes::AttributeStore;
use crate::connection::{Connection, ConnectionId, ConnectionRef};
use crate::error::{Error, Result};
use crate::middleware::ServerMiddleware;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A connection that records everything sent to it
pub struct MockConnection {
    id: ConnectionId,
    attributes: AttributeStore,
    sent: Mutex<Vec<Bytes>>,
    close_calls: AtomicUsize,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// Create a connection with a fresh id
    pub fn new() -> Self {
        Self::with_id(ConnectionId::next())
    }

    /// Create a connection with a fixed id
    pub fn with_id(id: ConnectionId) -> Self {
        Self {
            id,
            attributes: AttributeStore::new(),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    fn sent_lock(&self) -> MutexGuard<'_, Vec<Bytes>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent_lock().clone()
    }

    /// Everything sent so far, as lossy UTF-8
    pub fn sent_text(&self) -> Vec<String> {
        self.sent_lock()
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }

    /// Everything sent so far, parsed as JSON; non-JSON payloads are skipped
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent_lock()
            .iter()
            .filter_map(|data| serde_json::from_slice(data).ok())
            .collect()
    }

    /// Forget recorded sends
    pub fn clear(&self) {
        self.sent_lock().clear();
    }

    /// How many times `close` was called
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether `close` was called at least once
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    fn send(&self, data: Bytes) {
        self.sent_lock().push(data);
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("close_calls", &self.close_count())
            .finish()
    }
}

/// An event seen by a [`RecordingMiddleware`]
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    Open(ConnectionRef),
    Message(ConnectionRef, Bytes),
    Close(ConnectionRef),
    Error(ConnectionRef, String),
    Tick,
}

impl RecordedEvent {
    /// The connection the event was delivered for
    pub fn connection(&self) -> Option<&ConnectionRef> {
        match self {
            Self::Open(connection)
            | Self::Message(connection, _)
            | Self::Close(connection)
            | Self::Error(connection, _) => Some(connection),
            Self::Tick => None,
        }
    }
}

/// Shared view of the events a [`RecordingMiddleware`] saw
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventLog {
    fn push(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A terminal stage that records every event it receives
#[derive(Debug, Default)]
pub struct RecordingMiddleware {
    log: EventLog,
    sub_protocols: Vec<String>,
    reject: Option<Bytes>,
}

impl RecordingMiddleware {
    /// Create a recorder and the log it writes to
    pub fn new() -> (Self, EventLog) {
        let recorder = Self::default();
        let log = recorder.log.clone();
        (recorder, log)
    }

    /// Advertise `protocols` from [`ServerMiddleware::sub_protocols`]
    pub fn with_sub_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Fail `on_message` with `InvalidMessage` for payloads containing `marker`
    ///
    /// The message is still recorded.
    pub fn rejecting(mut self, marker: impl Into<Bytes>) -> Self {
        self.reject = Some(marker.into());
        self
    }
}

impl ServerMiddleware for RecordingMiddleware {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        self.log.push(RecordedEvent::Open(connection.clone()));
        Ok(())
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        let rejected = self.reject.as_ref().is_some_and(|marker| {
            !marker.is_empty() && data.windows(marker.len()).any(|window| window == &marker[..])
        });
        self.log
            .push(RecordedEvent::Message(connection.clone(), data));
        if rejected {
            return Err(Error::invalid_message("rejected by the recorder"));
        }
        Ok(())
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        self.log.push(RecordedEvent::Close(connection.clone()));
        Ok(())
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        self.log
            .push(RecordedEvent::Error(connection.clone(), error.to_string()));
        Ok(())
    }

    fn on_tick(&mut self) -> Result<()> {
        self.log.push(RecordedEvent::Tick);
        Ok(())
    }

    fn sub_protocols(&self) -> Vec<String> {
        self.sub_protocols.clone()
    }
}
