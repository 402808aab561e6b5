use super::{close_with_status, http_request};
use crate::connection::ConnectionRef;
use crate::error::{Error, Result};
use crate::middleware::{BoxedMiddleware, ServerMiddleware};
use bytes::Bytes;
use http::header::ORIGIN;
use http::StatusCode;
use tracing::{debug, warn};
use url::Url;

/// Stage rejecting handshakes from origins outside an allow-list
///
/// An empty allow-list lets every connection through.
pub struct RestrictToAllowedOrigins {
    next: BoxedMiddleware,
    allowed_origins: Vec<String>,
}

impl RestrictToAllowedOrigins {
    /// Wrap `next` with an empty allow-list
    pub fn new(next: BoxedMiddleware) -> Self {
        Self {
            next,
            allowed_origins: Vec::new(),
        }
    }

    /// Allow connections whose `Origin` host is `origin`
    pub fn allow_origin(&mut self, origin: impl Into<String>) {
        let origin = origin.into();
        if !self.allowed_origins.contains(&origin) {
            self.allowed_origins.push(origin);
        }
    }

    /// Stop allowing `origin`
    pub fn remove_allowed_origin(&mut self, origin: &str) {
        self.allowed_origins.retain(|allowed| allowed != origin);
    }

    /// The allowed origin hosts
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }
}

fn origin_host(origin: &str) -> Result<String> {
    Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .ok_or_else(|| Error::malformed_request(format!("Could not parse the origin \"{origin}\"")))
}

impl ServerMiddleware for RestrictToAllowedOrigins {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        let request = http_request(connection.as_ref()).ok_or_else(|| {
            Error::missing_request(
                "The HTTP request must be parsed before checking the origin",
            )
        })?;

        if self.allowed_origins.is_empty() {
            return self.next.on_open(connection);
        }

        let origins: Vec<&str> = request
            .headers()
            .get_all(ORIGIN)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        if origins.is_empty() {
            warn!(connection_id = %connection.id(), "Rejecting connection without an Origin header");
            close_with_status(connection.as_ref(), StatusCode::FORBIDDEN);
            return Ok(());
        }

        for origin in origins {
            let host = origin_host(origin)?;
            if !self.allowed_origins.contains(&host) {
                warn!(connection_id = %connection.id(), origin = %origin, "Rejecting connection from disallowed origin");
                close_with_status(connection.as_ref(), StatusCode::FORBIDDEN);
                return Ok(());
            }
        }

        debug!(connection_id = %connection.id(), "Origin allowed");
        self.next.on_open(connection)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        self.next.on_message(connection, data)
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        self.next.on_close(connection)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::http::HTTP_REQUEST;
    use crate::testing::{EventLog, MockConnection, RecordedEvent, RecordingMiddleware};
    use std::sync::Arc;

    fn stage(allowed: &[&str]) -> (RestrictToAllowedOrigins, EventLog) {
        let (recorder, log) = RecordingMiddleware::new();
        let mut stage = RestrictToAllowedOrigins::new(Box::new(recorder));
        for origin in allowed {
            stage.allow_origin(*origin);
        }
        (stage, log)
    }

    fn connection_with_origin(origin: Option<&str>) -> Arc<MockConnection> {
        let mut request = http::Request::new(());
        if let Some(origin) = origin {
            request
                .headers_mut()
                .insert(ORIGIN, http::HeaderValue::from_str(origin).unwrap());
        }
        let connection = Arc::new(MockConnection::new());
        connection.attributes().set(HTTP_REQUEST, Arc::new(request));
        connection
    }

    #[test]
    fn missing_request_fails() {
        let (mut stage, _log) = stage(&["example.com"]);
        let connection: ConnectionRef = Arc::new(MockConnection::new());

        let err = stage.on_open(&connection).unwrap_err();
        assert!(matches!(err, Error::MissingRequest(_)));
    }

    #[test]
    fn empty_allow_list_lets_everyone_in() {
        let (mut stage, log) = stage(&[]);
        let connection: ConnectionRef = connection_with_origin(None);

        stage.on_open(&connection).unwrap();
        assert!(matches!(log.events()[..], [RecordedEvent::Open(_)]));
    }

    #[test]
    fn allowed_origin_is_forwarded() {
        let (mut stage, log) = stage(&["example.com"]);
        let connection: ConnectionRef = connection_with_origin(Some("https://example.com:8443"));

        stage.on_open(&connection).unwrap();
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn unknown_origin_is_rejected_with_403() {
        let (mut stage, log) = stage(&["example.com"]);
        let mock = connection_with_origin(Some("https://evil.test"));
        let connection: ConnectionRef = mock.clone();

        stage.on_open(&connection).unwrap();
        assert!(log.events().is_empty());
        assert!(mock.sent_text()[0].starts_with("HTTP/1.1 403 Forbidden"));
        assert!(mock.is_closed());
    }

    #[test]
    fn missing_origin_is_rejected_with_403() {
        let (mut stage, _log) = stage(&["example.com"]);
        let mock = connection_with_origin(None);
        let connection: ConnectionRef = mock.clone();

        stage.on_open(&connection).unwrap();
        assert!(mock.is_closed());
    }

    #[test]
    fn unparsable_origin_fails() {
        let (mut stage, _log) = stage(&["example.com"]);
        let connection: ConnectionRef = connection_with_origin(Some("example.com"));

        let err = stage.on_open(&connection).unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[test]
    fn removing_an_origin_rejects_it() {
        let (mut stage, _log) = stage(&["example.com", "other.test"]);
        stage.remove_allowed_origin("example.com");
        assert_eq!(stage.allowed_origins(), ["other.test".to_string()]);

        let mock = connection_with_origin(Some("http://example.com"));
        let connection: ConnectionRef = mock.clone();
        stage.on_open(&connection).unwrap();
        assert!(mock.is_closed());
    }
}
