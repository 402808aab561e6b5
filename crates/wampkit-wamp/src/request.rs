use crate::router::RouteMatch;
use std::collections::HashMap;

/// Routing context for one dispatched WAMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WampMessageRequest {
    uri: String,
    route: String,
    handler_id: String,
    params: HashMap<String, String>,
}

impl WampMessageRequest {
    /// Build the request for `uri` from its route match
    pub fn new(uri: impl Into<String>, matched: RouteMatch) -> Self {
        Self {
            uri: uri.into(),
            route: matched.pattern,
            handler_id: matched.handler_id,
            params: matched.params,
        }
    }

    /// The resolved URI the message was sent to
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The route pattern that matched
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Id of the handler the route names
    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    /// A captured route parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All captured route parameters
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_route_attributes() {
        let request = WampMessageRequest::new(
            "http://example.com/chat/lobby",
            RouteMatch {
                pattern: "http://example.com/chat/{room}".into(),
                handler_id: "chat".into(),
                params: HashMap::from([("room".to_string(), "lobby".to_string())]),
            },
        );

        assert_eq!(request.uri(), "http://example.com/chat/lobby");
        assert_eq!(request.route(), "http://example.com/chat/{room}");
        assert_eq!(request.handler_id(), "chat");
        assert_eq!(request.param("room"), Some("lobby"));
        assert_eq!(request.param("missing"), None);
    }
}
