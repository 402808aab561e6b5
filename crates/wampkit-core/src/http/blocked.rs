use super::close_with_status;
use crate::attributes::REMOTE_ADDRESS;
use crate::connection::ConnectionRef;
use crate::error::{Error, Result};
use crate::middleware::{BoxedMiddleware, ServerMiddleware};
use bytes::Bytes;
use http::StatusCode;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

/// Stage refusing connections from blocked addresses or networks
///
/// Blocked connections are answered with 403 on open and every later event
/// for them is swallowed.
pub struct RejectBlockedIpAddress {
    next: BoxedMiddleware,
    blocked: Vec<IpNet>,
}

fn parse_address(address: &str) -> Result<IpNet> {
    if let Ok(network) = address.parse::<IpNet>() {
        return Ok(network);
    }
    let invalid = || Error::config(format!("\"{address}\" is not an IP address or CIDR range"));
    let ip = address.parse::<IpAddr>().map_err(|_| invalid())?;
    let host_prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, host_prefix).map_err(|_| invalid())
}

impl RejectBlockedIpAddress {
    /// Wrap `next` with an empty block list
    pub fn new(next: BoxedMiddleware) -> Self {
        Self {
            next,
            blocked: Vec::new(),
        }
    }

    /// Block a single address (`10.0.0.1`) or a CIDR range (`10.0.0.0/8`)
    pub fn block_address(&mut self, address: &str) -> Result<()> {
        let network = parse_address(address)?;
        if !self.blocked.contains(&network) {
            self.blocked.push(network);
        }
        Ok(())
    }

    /// Remove an entry previously added with [`block_address`](Self::block_address)
    pub fn allow_address(&mut self, address: &str) -> Result<()> {
        let network = parse_address(address)?;
        self.blocked.retain(|blocked| *blocked != network);
        Ok(())
    }

    /// The blocked networks
    pub fn blocked(&self) -> &[IpNet] {
        &self.blocked
    }

    fn is_blocked(&self, connection: &ConnectionRef) -> bool {
        let Some(address) = connection.attributes().get::<String>(REMOTE_ADDRESS) else {
            return false;
        };
        let Ok(ip) = address.parse::<IpAddr>() else {
            return false;
        };
        self.blocked.iter().any(|network| network.contains(&ip))
    }
}

impl ServerMiddleware for RejectBlockedIpAddress {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        if self.is_blocked(connection) {
            warn!(connection_id = %connection.id(), "Rejecting connection from blocked address");
            close_with_status(connection.as_ref(), StatusCode::FORBIDDEN);
            return Ok(());
        }
        self.next.on_open(connection)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        if self.is_blocked(connection) {
            return Ok(());
        }
        self.next.on_message(connection, data)
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        if self.is_blocked(connection) {
            return Ok(());
        }
        self.next.on_close(connection)
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        if self.is_blocked(connection) {
            return Ok(());
        }
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
    use crate::testing::{EventLog, MockConnection, RecordingMiddleware};
    use std::sync::Arc;

    fn stage() -> (RejectBlockedIpAddress, EventLog) {
        let (recorder, log) = RecordingMiddleware::new();
        (RejectBlockedIpAddress::new(Box::new(recorder)), log)
    }

    fn connection_from(address: &str) -> Arc<MockConnection> {
        let connection = Arc::new(MockConnection::new());
        connection
            .attributes()
            .set(REMOTE_ADDRESS, address.to_string());
        connection
    }

    #[test]
    fn blocked_address_gets_403_and_is_swallowed() {
        let (mut stage, log) = stage();
        stage.block_address("192.168.1.10").unwrap();

        let mock = connection_from("192.168.1.10");
        let connection: ConnectionRef = mock.clone();
        stage.on_open(&connection).unwrap();
        stage
            .on_message(&connection, Bytes::from_static(b"GET / HTTP/1.1"))
            .unwrap();
        stage.on_close(&connection).unwrap();

        assert!(mock.sent_text()[0].starts_with("HTTP/1.1 403 Forbidden"));
        assert!(mock.is_closed());
        assert!(log.events().is_empty());
    }

    #[test]
    fn cidr_ranges_block_contained_addresses() {
        let (mut stage, log) = stage();
        stage.block_address("10.0.0.0/8").unwrap();
        stage.block_address("2001:db8::/32").unwrap();

        let inside: ConnectionRef = connection_from("10.20.30.40");
        let inside_v6: ConnectionRef = connection_from("2001:db8::1");
        let outside: ConnectionRef = connection_from("11.0.0.1");
        stage.on_open(&inside).unwrap();
        stage.on_open(&inside_v6).unwrap();
        stage.on_open(&outside).unwrap();

        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn allow_address_unblocks() {
        let (mut stage, log) = stage();
        stage.block_address("127.0.0.1").unwrap();
        stage.allow_address("127.0.0.1").unwrap();
        assert!(stage.blocked().is_empty());

        let connection: ConnectionRef = connection_from("127.0.0.1");
        stage.on_open(&connection).unwrap();
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn connections_without_address_pass() {
        let (mut stage, log) = stage();
        stage.block_address("0.0.0.0/0").unwrap();

        let connection: ConnectionRef = Arc::new(MockConnection::new());
        stage.on_open(&connection).unwrap();
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        let (mut stage, _log) = stage();
        assert!(matches!(
            stage.block_address("not-an-ip"),
            Err(Error::Config(_))
        ));
    }
}
