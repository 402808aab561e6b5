//! WebSocket handshake negotiation

use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode, Version};

/// Header carrying the client's handshake key
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
/// Header carrying the protocol version
pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
/// Header carrying the sub-protocols
pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";
/// Header carrying the server's proof of the key
pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

const SUPPORTED_VERSION: &str = "13";

/// Generate the Sec-WebSocket-Accept key from the client's Sec-WebSocket-Key
pub fn generate_accept_key(key: &str) -> String {
    use base64::Engine;
    use sha1::{Digest, Sha1};

    const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    let hash = hasher.finalize();

    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Why a handshake was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: &'static str,
}

impl Rejection {
    fn new(status: StatusCode, reason: &'static str) -> Self {
        Self { status, reason }
    }
}

/// Validate that a request is a valid WebSocket upgrade request, returning its key
pub fn validate_upgrade_request(request: &Request<()>) -> Result<String, Rejection> {
    if request.method() != Method::GET {
        return Err(Rejection::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method must be GET",
        ));
    }

    if request.version() < Version::HTTP_11 {
        return Err(Rejection::new(
            StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            "HTTP/1.1 or later is required",
        ));
    }

    let headers = request.headers();
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "Missing Upgrade header"))?;

    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "Upgrade header must be 'websocket'",
        ));
    }

    let has_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|s| s.trim().eq_ignore_ascii_case("upgrade"));

    if !has_upgrade {
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "Connection header must contain 'Upgrade'",
        ));
    }

    let sec_key = headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key header"))?;

    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    if version != Some(SUPPORTED_VERSION) {
        return Err(Rejection::new(
            StatusCode::UPGRADE_REQUIRED,
            "Sec-WebSocket-Version must be 13",
        ));
    }

    Ok(sec_key.to_string())
}

/// Server side of the opening handshake
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    supported_sub_protocols: Vec<String>,
    strict_sub_protocol_check: bool,
}

impl Negotiator {
    /// Create a negotiator supporting `sub_protocols`
    pub fn new(sub_protocols: Vec<String>) -> Self {
        Self {
            supported_sub_protocols: sub_protocols,
            strict_sub_protocol_check: true,
        }
    }

    /// Refuse clients that only offer unsupported sub-protocols
    pub fn set_strict_sub_protocol_check(&mut self, strict: bool) {
        self.strict_sub_protocol_check = strict;
    }

    /// The sub-protocols this negotiator accepts
    pub fn supported_sub_protocols(&self) -> &[String] {
        &self.supported_sub_protocols
    }

    /// Answer `request`; anything but 101 refuses the upgrade
    pub fn handshake(&self, request: &Request<()>) -> Response<()> {
        let key = match validate_upgrade_request(request) {
            Ok(key) => key,
            Err(rejection) => return rejection_response(&rejection),
        };

        let offered: Vec<&str> = request
            .headers()
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|protocol| !protocol.is_empty())
            .collect();

        let selected = offered.iter().find(|protocol| {
            self.supported_sub_protocols
                .iter()
                .any(|supported| supported == *protocol)
        });

        if selected.is_none() && !offered.is_empty() && self.strict_sub_protocol_check {
            return rejection_response(&Rejection::new(
                StatusCode::BAD_REQUEST,
                "No supported sub-protocol was offered",
            ));
        }

        let mut response = Response::new(());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        if let Ok(accept) = HeaderValue::from_str(&generate_accept_key(&key)) {
            headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        }
        if let Some(protocol) = selected.and_then(|p| HeaderValue::from_str(p).ok()) {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
        }
        response
    }
}

fn rejection_response(rejection: &Rejection) -> Response<()> {
    let mut response = Response::new(());
    *response.status_mut() = rejection.status;
    let headers = response.headers_mut();
    if rejection.status == StatusCode::UPGRADE_REQUIRED {
        headers.insert(
            SEC_WEBSOCKET_VERSION,
            HeaderValue::from_static(SUPPORTED_VERSION),
        );
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
