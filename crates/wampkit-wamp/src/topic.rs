//! Pub/sub topics
//!
//! A [`Topic`] is a named set of subscribed [`WampConnection`]s. The
//! [`TopicRegistry`] is shared by every connection of a server and holds at
//! most one topic per URI.

use crate::connection::{WampConnection, WampConnectionRef};
use crate::message::MessageType;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use wampkit_core::{downcast_connection, Connection, ConnectionId, ConnectionRef, Error, Result};

/// A pub/sub channel identified by a URI
pub struct Topic {
    id: String,
    subscribers: Mutex<BTreeMap<ConnectionId, WampConnectionRef>>,
}

impl Topic {
    /// Create an empty topic
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    /// The topic URI
    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, WampConnectionRef>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe a connection
    ///
    /// Fails with [`Error::UnsupportedConnection`] unless the connection is a
    /// [`WampConnection`].
    pub fn add(&self, connection: &ConnectionRef) -> Result<()> {
        let wamp = downcast_connection::<WampConnection>(connection).ok_or_else(|| {
            Error::unsupported_connection(format!(
                "topic \"{}\" only accepts WAMP connections",
                self.id
            ))
        })?;
        self.subscribe(wamp);
        Ok(())
    }

    /// Subscribe a WAMP connection; subscribing twice has no effect
    pub fn subscribe(&self, connection: WampConnectionRef) {
        self.lock().insert(connection.id(), connection);
    }

    /// Whether the connection is subscribed; non-WAMP connections never are
    pub fn has(&self, connection: &ConnectionRef) -> bool {
        downcast_connection::<WampConnection>(connection)
            .is_some_and(|wamp| self.lock().contains_key(&wamp.id()))
    }

    /// Unsubscribe the connection; non-WAMP connections are ignored
    pub fn remove(&self, connection: &ConnectionRef) {
        if let Some(wamp) = downcast_connection::<WampConnection>(connection) {
            self.lock().remove(&wamp.id());
        }
    }

    /// Number of subscribers
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the subscribers
    pub fn subscribers(&self) -> Vec<WampConnectionRef> {
        self.lock().values().cloned().collect()
    }

    /// Send EVENT `[8, topic, event]` to the subscribers
    ///
    /// With both lists empty every subscriber receives the event. Otherwise a
    /// subscriber is skipped when its session id is in a non-empty `exclude`
    /// or missing from a non-empty `eligible`. Returns the number of
    /// subscribers the event was sent to.
    pub fn broadcast<T>(&self, event: &T, exclude: &[String], eligible: &[String]) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let message = Bytes::from(serde_json::to_string(&(MessageType::Event, &self.id, event))?);
        let subscribers = self.subscribers();

        if exclude.is_empty() && eligible.is_empty() {
            for subscriber in &subscribers {
                subscriber.send(message.clone());
            }
            return Ok(subscribers.len());
        }

        let mut delivered = 0;
        for subscriber in &subscribers {
            let session_id = subscriber.session_id();
            if !exclude.is_empty() && exclude.iter().any(|id| id == session_id) {
                continue;
            }
            if !eligible.is_empty() && !eligible.iter().any(|id| id == session_id) {
                continue;
            }
            subscriber.send(message.clone());
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("subscribers", &self.count())
            .finish()
    }
}

/// Server-wide table of topics by URI
#[derive(Default)]
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a topic; fails if its URI is taken
    pub fn add(&self, topic: Arc<Topic>) -> Result<()> {
        let mut topics = self.lock();
        if topics.contains_key(topic.id()) {
            return Err(Error::TopicAlreadyRegistered(topic.id().to_string()));
        }
        topics.insert(topic.id().to_string(), topic);
        Ok(())
    }

    /// Look up a topic
    pub fn get(&self, id: &str) -> Result<Arc<Topic>> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(id.to_string()))
    }

    /// Look up a topic, registering an empty one if absent
    pub fn get_or_create(&self, id: &str) -> Arc<Topic> {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Topic::new(id)))
            .clone()
    }

    /// Whether a topic is registered for `id`
    pub fn has(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Unregister the topic with the same URI as `topic`
    pub fn remove(&self, topic: &Topic) {
        self.lock().remove(topic.id());
    }

    /// Snapshot of every registered topic, ordered by URI
    pub fn all(&self) -> Vec<Arc<Topic>> {
        let mut topics: Vec<Arc<Topic>> = self.lock().values().cloned().collect();
        topics.sort_by(|a, b| a.id().cmp(b.id()));
        topics
    }

    /// Number of registered topics
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no topics are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.all().iter().map(|t| t.id().to_string()).collect();
        f.debug_struct("TopicRegistry").field("topics", &ids).finish()
    }
}
