use super::parser::{HttpRequestParser, RequestParser};
use super::{close_with_status, HTTP_HEADERS_RECEIVED, HTTP_REQUEST};
use crate::connection::ConnectionRef;
use crate::error::{Error, Result};
use crate::middleware::{BoxedMiddleware, ServerMiddleware};
use bytes::Bytes;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stage that waits for the opening HTTP request before anything else runs
///
/// The inner stage only sees `on_open` once the request head is complete; the
/// parsed request is available under [`HTTP_REQUEST`](super::HTTP_REQUEST).
pub struct ParseHttpRequest<P = HttpRequestParser> {
    next: BoxedMiddleware,
    parser: P,
}

impl ParseHttpRequest {
    /// Wrap `next` using the default parser
    pub fn new(next: BoxedMiddleware) -> Self {
        Self::with_parser(next, HttpRequestParser::default())
    }
}

impl<P> ParseHttpRequest<P>
where
    P: RequestParser,
{
    /// Wrap `next` using a custom parser
    pub fn with_parser(next: BoxedMiddleware, parser: P) -> Self {
        Self { next, parser }
    }

    fn headers_received(connection: &ConnectionRef) -> bool {
        connection
            .attributes()
            .get_or(HTTP_HEADERS_RECEIVED, false)
    }
}

impl<P> ServerMiddleware for ParseHttpRequest<P>
where
    P: RequestParser,
{
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        connection.attributes().set(HTTP_HEADERS_RECEIVED, false);
        Ok(())
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        if Self::headers_received(connection) {
            return self.next.on_message(connection, data);
        }

        let request = match self.parser.parse(connection.as_ref(), &data) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(err @ Error::MessageTooLarge { .. }) => {
                warn!(connection_id = %connection.id(), error = %err, "Rejecting HTTP request");
                close_with_status(connection.as_ref(), StatusCode::PAYLOAD_TOO_LARGE);
                return Ok(());
            }
            Err(err) => {
                warn!(connection_id = %connection.id(), error = %err, "Rejecting HTTP request");
                close_with_status(connection.as_ref(), StatusCode::BAD_REQUEST);
                return Ok(());
            }
        };

        debug!(
            connection_id = %connection.id(),
            method = %request.method(),
            uri = %request.uri(),
            "HTTP request received"
        );

        connection.attributes().set(HTTP_REQUEST, Arc::new(request));
        connection.attributes().set(HTTP_HEADERS_RECEIVED, true);

        self.next.on_open(connection)
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        if Self::headers_received(connection) {
            self.next.on_close(connection)?;
        }
        Ok(())
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        if Self::headers_received(connection) {
            return self.next.on_error(connection, error);
        }

        warn!(connection_id = %connection.id(), error = %error, "Error before HTTP request completed");
        close_with_status(connection.as_ref(), StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
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
    use crate::http::http_request;
    use crate::testing::{MockConnection, RecordedEvent, RecordingMiddleware};

    fn stage() -> (ParseHttpRequest, crate::testing::EventLog) {
        let (recorder, log) = RecordingMiddleware::new();
        (ParseHttpRequest::new(Box::new(recorder)), log)
    }

    #[test]
    fn open_is_deferred_until_headers_arrive() {
        let (mut stage, log) = stage();
        let connection: ConnectionRef = Arc::new(MockConnection::new());

        stage.on_open(&connection).unwrap();
        assert!(log.events().is_empty());

        stage
            .on_message(&connection, Bytes::from_static(b"GET / HTTP/1.1\r\n"))
            .unwrap();
        assert!(log.events().is_empty());

        stage
            .on_message(&connection, Bytes::from_static(b"Host: localhost\r\n\r\n"))
            .unwrap();
        assert!(matches!(log.events()[..], [RecordedEvent::Open(_)]));

        let request = http_request(connection.as_ref()).unwrap();
        assert_eq!(request.headers()["host"], "localhost");
    }

    #[test]
    fn later_messages_are_forwarded() {
        let (mut stage, log) = stage();
        let connection: ConnectionRef = Arc::new(MockConnection::new());

        stage.on_open(&connection).unwrap();
        stage
            .on_message(&connection, Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"))
            .unwrap();
        stage
            .on_message(&connection, Bytes::from_static(b"frame"))
            .unwrap();
        stage.on_close(&connection).unwrap();

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], RecordedEvent::Message(_, data) if &data[..] == b"frame"));
        assert!(matches!(events[2], RecordedEvent::Close(_)));
    }

    #[test]
    fn malformed_request_closes_with_400() {
        let (mut stage, log) = stage();
        let mock = Arc::new(MockConnection::new());
        let connection: ConnectionRef = mock.clone();

        stage.on_open(&connection).unwrap();
        stage
            .on_message(&connection, Bytes::from_static(b"garbage\r\n\r\n"))
            .unwrap();

        assert!(mock.sent_text()[0].starts_with("HTTP/1.1 400 Bad Request"));
        assert!(mock.is_closed());
        assert!(log.events().is_empty());
    }

    #[test]
    fn oversized_request_closes_with_413() {
        let (recorder, _log) = RecordingMiddleware::new();
        let mut stage =
            ParseHttpRequest::with_parser(Box::new(recorder), HttpRequestParser::new(8));
        let mock = Arc::new(MockConnection::new());
        let connection: ConnectionRef = mock.clone();

        stage.on_open(&connection).unwrap();
        stage
            .on_message(&connection, Bytes::from_static(b"GET /a/long/path"))
            .unwrap();

        assert!(mock.sent_text()[0].starts_with("HTTP/1.1 413 Payload Too Large"));
        assert!(mock.is_closed());
    }

    #[test]
    fn close_and_error_before_headers_are_not_forwarded() {
        let (mut stage, log) = stage();
        let mock = Arc::new(MockConnection::new());
        let connection: ConnectionRef = mock.clone();

        stage.on_open(&connection).unwrap();
        stage
            .on_error(&connection, &Error::invalid_frame("boom"))
            .unwrap();
        stage.on_close(&connection).unwrap();

        assert!(log.events().is_empty());
        assert!(mock.sent_text()[0].starts_with("HTTP/1.1 500 Internal Server Error"));
    }
}
