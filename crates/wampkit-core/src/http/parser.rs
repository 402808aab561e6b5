//! Buffering HTTP request parser

use super::HTTP_BUFFER;
use crate::connection::Connection;
use crate::error::{Error, Result};
use http::{Request, Version};

/// Default upper bound on the buffered request head, in bytes
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 4096;

const MAX_HEADERS: usize = 64;

/// Turns the bytes of a connection into an HTTP request
pub trait RequestParser: Send {
    /// Feed `data` received on `connection`
    ///
    /// Returns `Ok(None)` while the request is incomplete.
    fn parse(&self, connection: &dyn Connection, data: &[u8]) -> Result<Option<Request<()>>>;
}

/// Default [`RequestParser`], buffering into the connection attributes
#[derive(Debug, Clone)]
pub struct HttpRequestParser {
    max_request_size: usize,
}

impl Default for HttpRequestParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_SIZE)
    }
}

impl HttpRequestParser {
    /// Create a parser with the given size limit
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }

    /// The size limit
    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    fn feed(&self, buffer: &mut Vec<u8>, data: &[u8]) -> Result<Option<Request<()>>> {
        buffer.extend_from_slice(data);
        if buffer.len() > self.max_request_size {
            return Err(Error::MessageTooLarge {
                limit: self.max_request_size,
            });
        }
        parse_request(buffer)
    }
}

impl RequestParser for HttpRequestParser {
    fn parse(&self, connection: &dyn Connection, data: &[u8]) -> Result<Option<Request<()>>> {
        let attributes = connection.attributes();
        if !attributes.has(HTTP_BUFFER) {
            attributes.set(HTTP_BUFFER, Vec::<u8>::new());
        }

        let outcome = attributes
            .update(HTTP_BUFFER, |buffer: &mut Vec<u8>| self.feed(buffer, data))
            .unwrap_or_else(|| self.feed(&mut Vec::new(), data));

        if !matches!(outcome, Ok(None)) {
            attributes.remove(HTTP_BUFFER);
        }
        outcome
    }
}

/// Parse a request head with `httparse`; anything after the blank line is ignored
///
/// Returns `Ok(None)` while the head is incomplete.
fn parse_request(buffer: &[u8]) -> Result<Option<Request<()>>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let status = parsed
        .parse(buffer)
        .map_err(|err| Error::malformed_request(err.to_string()))?;
    if status.is_partial() {
        return Ok(None);
    }

    let (Some(method), Some(path), Some(version)) = (parsed.method, parsed.path, parsed.version)
    else {
        return Err(Error::malformed_request("incomplete request line"));
    };
    let version = match version {
        1 => Version::HTTP_11,
        _ => Version::HTTP_10,
    };

    let mut builder = Request::builder().method(method).uri(path).version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    builder
        .body(())
        .map(Some)
        .map_err(|err| Error::malformed_request(err.to_string()))
}
