use super::{BoxedWampMiddleware, WampServerMiddleware};
use crate::connection::WampConnectionRef;
use crate::topic::{Topic, TopicRegistry};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use wampkit_core::{Connection, ConnectionRef, Error, Result, ServerMiddleware};

/// Key holding the ids of the topics a connection joined, a `HashSet<String>`
pub const WAMP_SUBSCRIPTIONS: &str = "wamp.subscriptions";

/// Keeps topic membership in step with SUBSCRIBE, UNSUBSCRIBE and PUBLISH
///
/// Topics left without subscribers are removed from the registry. When a
/// connection closes it is swept from every registered topic.
pub struct UpdateTopicSubscriptions {
    next: BoxedWampMiddleware,
    registry: Arc<TopicRegistry>,
}

impl UpdateTopicSubscriptions {
    pub fn new<M>(next: M, registry: Arc<TopicRegistry>) -> Self
    where
        M: WampServerMiddleware + 'static,
    {
        Self {
            next: Box::new(next),
            registry,
        }
    }

    fn is_subscribed(connection: &dyn Connection, topic: &Topic) -> bool {
        connection
            .attributes()
            .get::<HashSet<String>>(WAMP_SUBSCRIPTIONS)
            .is_some_and(|subscriptions| subscriptions.contains(topic.id()))
    }

    fn remember(connection: &dyn Connection, topic: &Topic) {
        let attributes = connection.attributes();
        let updated = attributes.update(WAMP_SUBSCRIPTIONS, |subscriptions: &mut HashSet<String>| {
            subscriptions.insert(topic.id().to_string());
        });
        if updated.is_none() {
            attributes.set(
                WAMP_SUBSCRIPTIONS,
                HashSet::from([topic.id().to_string()]),
            );
        }
    }

    /// Drop the connection from `topic`, pruning the topic once it is empty
    fn clean_topic(&self, topic: &Topic, connection: &ConnectionRef) {
        connection
            .attributes()
            .update(WAMP_SUBSCRIPTIONS, |subscriptions: &mut HashSet<String>| {
                subscriptions.remove(topic.id());
            });
        topic.remove(connection);
        self.prune(topic);
    }

    /// Unregister `topic` if neither it nor the registered topic of the same
    /// URI has subscribers
    fn prune(&self, topic: &Topic) {
        if !topic.is_empty() {
            return;
        }
        if let Ok(registered) = self.registry.get(topic.id()) {
            if registered.is_empty() {
                self.registry.remove(topic);
                tracing::debug!(topic = %topic.id(), "Removed empty topic");
            }
        }
    }
}

impl ServerMiddleware for UpdateTopicSubscriptions {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        connection
            .attributes()
            .set(WAMP_SUBSCRIPTIONS, HashSet::<String>::new());
        self.next.on_open(connection)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        self.next.on_message(connection, data)
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        let result = self.next.on_close(connection);

        for topic in self.registry.all() {
            self.clean_topic(&topic, connection);
        }

        result
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        self.next.on_error(connection, error)
    }

    fn on_tick(&mut self) -> Result<()> {
        self.next.on_tick()
    }

    fn sub_protocols(&self) -> Vec<String> {
        self.next.sub_protocols()
    }
}

impl WampServerMiddleware for UpdateTopicSubscriptions {
    fn on_call(
        &mut self,
        connection: &WampConnectionRef,
        call_id: &str,
        topic: &Arc<Topic>,
        params: Vec<Value>,
    ) -> Result<()> {
        let result = self.next.on_call(connection, call_id, topic, params);
        self.prune(topic);
        result
    }

    fn on_subscribe(&mut self, connection: &WampConnectionRef, topic: &Arc<Topic>) -> Result<()> {
        if Self::is_subscribed(&**connection, topic) {
            return Ok(());
        }

        if !self.registry.has(topic.id()) {
            self.registry.add(topic.clone())?;
        }

        topic.subscribe(connection.clone());
        Self::remember(&**connection, topic);

        match self.next.on_subscribe(connection, topic) {
            Err(err) if err.is_route_not_found() => {
                let decorated: ConnectionRef = connection.clone();
                self.clean_topic(topic, &decorated);
                Err(err)
            }
            result => result,
        }
    }

    fn on_unsubscribe(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
    ) -> Result<()> {
        if !Self::is_subscribed(&**connection, topic) {
            self.prune(topic);
            return Ok(());
        }

        let decorated: ConnectionRef = connection.clone();
        self.clean_topic(topic, &decorated);

        self.next.on_unsubscribe(connection, topic)
    }

    fn on_publish(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    ) -> Result<()> {
        match self
            .next
            .on_publish(connection, topic, event, exclude, eligible)
        {
            Err(err) if err.is_route_not_found() => {
                let decorated: ConnectionRef = connection.clone();
                self.clean_topic(topic, &decorated);
                Err(err)
            }
            result => result,
        }
    }
}
