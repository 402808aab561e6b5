use crate::message::{MessageType, PROTOCOL_VERSION};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use wampkit_core::{AttributeStore, Connection, ConnectionId, ConnectionRef, Result};

/// Key holding the session id of a WAMP connection
pub const WAMP_SESSION_ID: &str = "wamp.session_id";

/// Key holding the CURIE prefix table, a `HashMap<String, String>`
pub const WAMP_PREFIXES: &str = "wamp.prefixes";

/// Shared handle to a WAMP connection
pub type WampConnectionRef = Arc<WampConnection>;

/// Generate a random 256-bit session id as 64 hex characters
pub fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Whether `uri` contains an `http://` or `https://` scheme marker
fn has_http_scheme(uri: &str) -> bool {
    uri.match_indices("http").any(|(index, _)| {
        uri[index + 4..]
            .trim_start_matches('s')
            .starts_with("://")
    })
}

/// A connection speaking WAMP v1
///
/// Wraps the WebSocket connection it was opened on and adds the protocol
/// helpers. The session id is fixed for the connection's lifetime.
pub struct WampConnection {
    inner: ConnectionRef,
    session_id: String,
}

impl WampConnection {
    /// Decorate `inner` with a fresh session id
    pub fn new(inner: ConnectionRef) -> Self {
        Self::with_session_id(inner, generate_session_id())
    }

    /// Decorate `inner` with a known session id
    pub fn with_session_id(inner: ConnectionRef, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let attributes = inner.attributes();
        attributes.set(WAMP_SESSION_ID, session_id.clone());
        attributes.set(WAMP_PREFIXES, HashMap::<String, String>::new());
        Self { inner, session_id }
    }

    /// The wrapped connection
    pub fn inner(&self) -> &ConnectionRef {
        &self.inner
    }

    /// The session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn send_message<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.inner.send(Bytes::from(json));
        Ok(())
    }

    /// Send WELCOME announcing `server_identity`
    pub fn welcome(&self, server_identity: &str) -> Result<()> {
        self.send_message(&(
            MessageType::Welcome,
            &self.session_id,
            PROTOCOL_VERSION,
            server_identity,
        ))
    }

    /// Send CALLRESULT; `None` is sent as `null`
    pub fn call_result<T: Serialize + ?Sized>(&self, call_id: &str, result: Option<&T>) -> Result<()> {
        self.send_message(&(MessageType::CallResult, call_id, result))
    }

    /// Send CALLERROR, with details only when given
    pub fn call_error(
        &self,
        call_id: &str,
        error_uri: &str,
        description: &str,
        details: Option<&Value>,
    ) -> Result<()> {
        match details {
            Some(details) => self.send_message(&(
                MessageType::CallError,
                call_id,
                error_uri,
                description,
                details,
            )),
            None => self.send_message(&(MessageType::CallError, call_id, error_uri, description)),
        }
    }

    /// Send EVENT for `topic_uri`
    pub fn event<T: Serialize + ?Sized>(&self, topic_uri: &str, event: &T) -> Result<()> {
        self.send_message(&(MessageType::Event, topic_uri, event))
    }

    /// Register `prefix` locally and announce it with PREFIX
    pub fn prefix(&self, prefix: &str, uri: &str) -> Result<()> {
        self.register_prefix(prefix, uri);
        self.send_message(&(MessageType::Prefix, prefix, uri))
    }

    /// Register `prefix` without telling the client
    pub fn register_prefix(&self, prefix: &str, uri: &str) {
        let attributes = self.inner.attributes();
        let updated = attributes.update(WAMP_PREFIXES, |prefixes: &mut HashMap<String, String>| {
            prefixes.insert(prefix.to_string(), uri.to_string());
        });
        if updated.is_none() {
            let prefixes = HashMap::from([(prefix.to_string(), uri.to_string())]);
            attributes.set(WAMP_PREFIXES, prefixes);
        }
    }

    /// Resolve a CURIE against the registered prefixes
    ///
    /// Full http(s) URIs, URIs without `:` and URIs with an unknown prefix are
    /// returned unchanged.
    pub fn get_uri(&self, uri: &str) -> String {
        if has_http_scheme(uri) {
            return uri.to_string();
        }
        let Some((prefix, local_name)) = uri.split_once(':') else {
            return uri.to_string();
        };
        let prefixes: HashMap<String, String> = self
            .inner
            .attributes()
            .get(WAMP_PREFIXES)
            .unwrap_or_default();
        match prefixes.get(prefix) {
            Some(base) => format!("{base}#{local_name}"),
            None => uri.to_string(),
        }
    }
}

impl Connection for WampConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    fn attributes(&self) -> &AttributeStore {
        self.inner.attributes()
    }

    fn send(&self, data: Bytes) {
        self.inner.send(data);
    }

    fn close(&self) {
        self.inner.close();
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for WampConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WampConnection")
            .field("session_id", &self.session_id)
            .field("inner", &self.inner)
            .finish()
    }
}
