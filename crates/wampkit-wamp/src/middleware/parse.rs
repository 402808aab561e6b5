use super::{BoxedWampMiddleware, WampServerMiddleware};
use crate::connection::{WampConnection, WampConnectionRef};
use crate::message::{self, Exclude, WampAction};
use crate::topic::TopicRegistry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use wampkit_core::{ConnectionId, ConnectionRef, Error, Result, ServerMiddleware};

/// Server identity sent in WELCOME unless configured otherwise
pub const DEFAULT_SERVER_IDENTITY: &str = concat!("wampkit/", env!("CARGO_PKG_VERSION"));

/// Decodes WAMP messages and drives the inner WAMP stage
///
/// Every opened connection is decorated as a [`WampConnection`] and greeted
/// with WELCOME. The decoration is kept until the connection closes, so
/// later events for the same connection reach the inner stage with the same
/// session.
pub struct ParseWampMessage {
    next: BoxedWampMiddleware,
    registry: Arc<TopicRegistry>,
    connections: HashMap<ConnectionId, WampConnectionRef>,
    server_identity: String,
}

impl ParseWampMessage {
    pub fn new<M>(next: M, registry: Arc<TopicRegistry>) -> Self
    where
        M: WampServerMiddleware + 'static,
    {
        Self {
            next: Box::new(next),
            registry,
            connections: HashMap::new(),
            server_identity: DEFAULT_SERVER_IDENTITY.to_string(),
        }
    }

    /// Announce `identity` in WELCOME
    pub fn with_server_identity(mut self, identity: impl Into<String>) -> Self {
        self.server_identity = identity.into();
        self
    }

    pub fn server_identity(&self) -> &str {
        &self.server_identity
    }

    /// The topic registry actions are resolved against
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Number of open WAMP connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn decorated(&self, connection: &ConnectionRef) -> Option<WampConnectionRef> {
        self.connections.get(&connection.id()).cloned()
    }
}

impl ServerMiddleware for ParseWampMessage {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        let wamp = Arc::new(WampConnection::new(connection.clone()));
        wamp.welcome(&self.server_identity)?;
        self.connections.insert(connection.id(), wamp.clone());

        tracing::debug!(
            connection_id = %connection.id(),
            session_id = %wamp.session_id(),
            "WAMP session started"
        );

        let decorated: ConnectionRef = wamp;
        self.next.on_open(&decorated)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        let wamp = self.decorated(connection).ok_or_else(|| {
            Error::unsupported_connection(format!(
                "connection {} has no WAMP session",
                connection.id()
            ))
        })?;

        let action = message::decode(&data)?;
        tracing::debug!(connection_id = %connection.id(), action = ?action, "WAMP message");

        match action {
            WampAction::Prefix { prefix, uri } => {
                wamp.register_prefix(&prefix, &uri);
                Ok(())
            }
            WampAction::Call {
                call_id,
                proc_uri,
                params,
            } => {
                let topic = self.registry.get_or_create(&wamp.get_uri(&proc_uri));
                self.next.on_call(&wamp, &call_id, &topic, params)
            }
            WampAction::Subscribe { topic_uri } => {
                let topic = self.registry.get_or_create(&wamp.get_uri(&topic_uri));
                self.next.on_subscribe(&wamp, &topic)
            }
            WampAction::Unsubscribe { topic_uri } => {
                let topic = self.registry.get_or_create(&wamp.get_uri(&topic_uri));
                self.next.on_unsubscribe(&wamp, &topic)
            }
            WampAction::Publish {
                topic_uri,
                event,
                exclude,
                eligible,
            } => {
                let exclude = match exclude {
                    Exclude::Sessions(sessions) => sessions,
                    Exclude::Publisher => vec![wamp.session_id().to_string()],
                };
                let topic = self.registry.get_or_create(&wamp.get_uri(&topic_uri));
                self.next.on_publish(&wamp, &topic, event, exclude, eligible)
            }
        }
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        match self.connections.remove(&connection.id()) {
            Some(wamp) => {
                let decorated: ConnectionRef = wamp;
                self.next.on_close(&decorated)
            }
            None => self.next.on_close(connection),
        }
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        match self.decorated(connection) {
            Some(wamp) => {
                let decorated: ConnectionRef = wamp;
                self.next.on_error(&decorated, error)
            }
            None => self.next.on_error(connection, error),
        }
    }

    fn on_tick(&mut self) -> Result<()> {
        self.next.on_tick()
    }

    fn sub_protocols(&self) -> Vec<String> {
        let mut protocols = self.next.sub_protocols();
        protocols.push("wamp".to_string());
        protocols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WAMP_SESSION_ID;
    use crate::middleware::testing::{RecordingWampMiddleware, WampEvent};
    use serde_json::json;
    use std::sync::Mutex;
    use wampkit_core::testing::MockConnection;
    use wampkit_core::Connection;

    fn stage() -> (
        ParseWampMessage,
        Arc<Mutex<Vec<WampEvent>>>,
        Arc<MockConnection>,
        ConnectionRef,
    ) {
        let (recorder, events) = RecordingWampMiddleware::new();
        let stage = ParseWampMessage::new(recorder, Arc::new(TopicRegistry::new()))
            .with_server_identity("test-server");
        let mock = Arc::new(MockConnection::new());
        let connection: ConnectionRef = mock.clone();
        (stage, events, mock, connection)
    }

    fn send(stage: &mut ParseWampMessage, connection: &ConnectionRef, message: serde_json::Value) -> Result<()> {
        stage.on_message(connection, Bytes::from(message.to_string()))
    }

    fn session(mock: &MockConnection) -> String {
        mock.attributes().get::<String>(WAMP_SESSION_ID).unwrap()
    }

    #[test]
    fn open_sends_welcome_and_forwards_decorated_connection() {
        let (mut stage, events, mock, connection) = stage();
        stage.on_open(&connection).unwrap();

        let session = session(&mock);
        assert_eq!(session.len(), 64);
        assert_eq!(mock.sent_json(), vec![json!([0, session, 1, "test-server"])]);
        assert_eq!(*events.lock().unwrap(), vec![WampEvent::Open(session)]);
        assert_eq!(stage.connection_count(), 1);
    }

    #[test]
    fn default_identity_names_the_crate() {
        let (recorder, _) = RecordingWampMiddleware::new();
        let stage = ParseWampMessage::new(recorder, Arc::new(TopicRegistry::new()));
        assert!(stage.server_identity().starts_with("wampkit/"));
    }

    #[test]
    fn wamp_is_added_to_sub_protocols() {
        let (stage, ..) = stage();
        assert_eq!(stage.sub_protocols(), vec!["wamp".to_string()]);
    }

    #[test]
    fn prefix_then_call_resolves_curie() {
        let (mut stage, events, mock, connection) = stage();
        stage.on_open(&connection).unwrap();
        let session = session(&mock);

        send(&mut stage, &connection, json!([1, "calc", "http://example.com/calc"])).unwrap();
        send(&mut stage, &connection, json!([2, "c1", "calc:add", 1, 2])).unwrap();
        send(&mut stage, &connection, json!([2, 9, "calc:sum", [1, 2, 3]])).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            events[1..],
            [
                WampEvent::Call {
                    session: session.clone(),
                    call_id: "c1".into(),
                    topic: "http://example.com/calc#add".into(),
                    params: vec![json!(1), json!(2)],
                },
                WampEvent::Call {
                    session,
                    call_id: "9".into(),
                    topic: "http://example.com/calc#sum".into(),
                    params: vec![json!(1), json!(2), json!(3)],
                },
            ]
        );
        assert!(stage.registry().has("http://example.com/calc#add"));
    }

    #[test]
    fn publish_with_truthy_exclude_excludes_publisher() {
        let (mut stage, events, mock, connection) = stage();
        stage.on_open(&connection).unwrap();
        let session = session(&mock);

        send(&mut stage, &connection, json!([7, "http://example.com/t", "hi", true])).unwrap();
        send(
            &mut stage,
            &connection,
            json!([7, "http://example.com/t", "hi", ["x"], ["y"]]),
        )
        .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            events[1],
            WampEvent::Publish {
                session: session.clone(),
                topic: "http://example.com/t".into(),
                event: json!("hi"),
                exclude: vec![session.clone()],
                eligible: vec![],
            }
        );
        assert_eq!(
            events[2],
            WampEvent::Publish {
                session,
                topic: "http://example.com/t".into(),
                event: json!("hi"),
                exclude: vec!["x".into()],
                eligible: vec!["y".into()],
            }
        );
    }

    #[test]
    fn subscribe_and_unsubscribe_share_topic() {
        let (mut stage, events, mock, connection) = stage();
        stage.on_open(&connection).unwrap();
        let session = session(&mock);

        send(&mut stage, &connection, json!([5, "http://example.com/t"])).unwrap();
        send(&mut stage, &connection, json!([6, "http://example.com/t"])).unwrap();

        assert_eq!(
            events.lock().unwrap()[1..],
            [
                WampEvent::Subscribe(session.clone(), "http://example.com/t".into()),
                WampEvent::Unsubscribe(session, "http://example.com/t".into()),
            ]
        );
        assert_eq!(stage.registry().len(), 1);
    }

    #[test]
    fn malformed_messages_fail() {
        let (mut stage, _, _, connection) = stage();
        stage.on_open(&connection).unwrap();

        assert!(matches!(
            stage.on_message(&connection, Bytes::from_static(b"{}")),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            send(&mut stage, &connection, json!([3, "c1", null])),
            Err(Error::UnsupportedMessageType(3))
        ));
    }

    #[test]
    fn message_without_session_is_rejected() {
        let (mut stage, _, _, connection) = stage();
        assert!(matches!(
            send(&mut stage, &connection, json!([5, "t"])),
            Err(Error::UnsupportedConnection(_))
        ));
    }

    #[test]
    fn close_forwards_decoration_and_forgets_connection() {
        let (mut stage, events, mock, connection) = stage();
        stage.on_open(&connection).unwrap();
        let session = session(&mock);

        stage
            .on_error(&connection, &Error::invalid_message("bad"))
            .unwrap();
        stage.on_close(&connection).unwrap();

        assert_eq!(
            events.lock().unwrap()[1..],
            [
                WampEvent::Error(session.clone(), "Invalid WAMP message: bad".into()),
                WampEvent::Close(session),
            ]
        );
        assert_eq!(stage.connection_count(), 0);
    }
}
