//! HTTP request stages
//!
//! Connections start as raw byte streams. [`ParseHttpRequest`] buffers the
//! opening HTTP request and hands the parsed request to the inner stages
//! through the connection attributes; [`RestrictToAllowedOrigins`] and
//! [`RejectBlockedIpAddress`] gate connections before any upgrade happens.

mod blocked;
mod origins;
mod parse_request;
mod parser;

pub use blocked::RejectBlockedIpAddress;
pub use origins::RestrictToAllowedOrigins;
pub use parse_request::ParseHttpRequest;
pub use parser::{HttpRequestParser, RequestParser, DEFAULT_MAX_REQUEST_SIZE};

use crate::connection::Connection;
use bytes::{BufMut, Bytes, BytesMut};
use http::{Request, Response, StatusCode};
use std::sync::Arc;

/// Key holding the parsed `Arc<http::Request<()>>`
pub const HTTP_REQUEST: &str = "http.request";

/// Key holding whether the request headers have been received
pub const HTTP_HEADERS_RECEIVED: &str = "http.headers_received";

/// Key holding the bytes buffered while waiting for the end of the headers
pub const HTTP_BUFFER: &str = "http.buffer";

/// The parsed HTTP request of a connection, if any
pub fn http_request(connection: &dyn Connection) -> Option<Arc<Request<()>>> {
    connection.attributes().get(HTTP_REQUEST)
}

/// Serialize a bodiless response head
pub fn encode_response(response: &Response<()>) -> Bytes {
    let mut out = BytesMut::with_capacity(128);
    out.put_slice(format!("HTTP/1.1 {}\r\n", response.status()).as_bytes());
    for (name, value) in response.headers() {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    out.freeze()
}

/// Answer with `status` and close the connection
pub fn close_with_status(connection: &dyn Connection, status: StatusCode) {
    let mut response = Response::new(());
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_LENGTH,
        http::HeaderValue::from_static("0"),
    );
    response.headers_mut().insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("close"),
    );

    connection.send(encode_response(&response));
    connection.close();
}
