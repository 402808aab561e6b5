//! URI routing using a radix tree (matchit)
//!
//! Routes map WAMP URI patterns to handler ids. Patterns use `{name}` for a
//! parameter and `{*name}` for a catch-all:
//!
//! ```text
//! http://example.com/calc#add       static
//! http://example.com/chat/{room}    one parameter
//! http://example.com/files/{*path}  catch-all
//! ```
//!
//! Conflicting patterns are rejected when they are registered.

use std::collections::HashMap;
use std::fmt;
use wampkit_core::{Error, Result};

/// A successful route match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The pattern the URI matched
    pub pattern: String,
    /// Id of the handler registered for the pattern
    pub handler_id: String,
    /// Values captured by the pattern's parameters
    pub params: HashMap<String, String>,
}

/// Resolves a URI to a handler id
pub trait Router: Send + Sync {
    /// Match `uri`, failing with [`Error::RouteNotFound`] if nothing matches
    fn match_uri(&self, uri: &str) -> Result<RouteMatch>;
}

#[derive(Debug, Clone)]
struct RouteTarget {
    pattern: String,
    handler_id: String,
}

/// [`Router`] backed by `matchit`
pub struct MatchitRouter {
    inner: matchit::Router<RouteTarget>,
    patterns: Vec<String>,
}

impl MatchitRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            inner: matchit::Router::new(),
            patterns: Vec::new(),
        }
    }

    /// Register a pattern, builder style
    pub fn route(mut self, pattern: impl Into<String>, handler_id: impl Into<String>) -> Result<Self> {
        self.insert(pattern, handler_id)?;
        Ok(self)
    }

    /// Register a pattern
    pub fn insert(&mut self, pattern: impl Into<String>, handler_id: impl Into<String>) -> Result<()> {
        let pattern = pattern.into();
        let target = RouteTarget {
            pattern: pattern.clone(),
            handler_id: handler_id.into(),
        };

        self.inner
            .insert(pattern.clone(), target)
            .map_err(|err| Error::RouteConflict {
                pattern: pattern.clone(),
                details: err.to_string(),
            })?;

        tracing::debug!(pattern = %pattern, "Registered WAMP route");
        self.patterns.push(pattern);
        Ok(())
    }

    /// Registered patterns, in registration order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for MatchitRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Router for MatchitRouter {
    fn match_uri(&self, uri: &str) -> Result<RouteMatch> {
        let matched = self
            .inner
            .at(uri)
            .map_err(|_| Error::route_not_found(uri))?;

        Ok(RouteMatch {
            pattern: matched.value.pattern.clone(),
            handler_id: matched.value.handler_id.clone(),
            params: matched
                .params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        })
    }
}

impl fmt::Debug for MatchitRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchitRouter")
            .field("patterns", &self.patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> MatchitRouter {
        MatchitRouter::new()
            .route("http://example.com/calc#add", "calc.add")
            .unwrap()
            .route("http://example.com/chat/{room}", "chat")
            .unwrap()
    }

    #[test]
    fn static_route_matches() {
        let matched = router().match_uri("http://example.com/calc#add").unwrap();
        assert_eq!(matched.handler_id, "calc.add");
        assert_eq!(matched.pattern, "http://example.com/calc#add");
        assert!(matched.params.is_empty());
    }

    #[test]
    fn parameters_are_captured() {
        let matched = router().match_uri("http://example.com/chat/lobby").unwrap();
        assert_eq!(matched.handler_id, "chat");
        assert_eq!(matched.params.get("room"), Some(&"lobby".to_string()));
    }

    #[test]
    fn unknown_uri_is_route_not_found() {
        let err = router().match_uri("http://example.com/missing").unwrap_err();
        assert!(err.is_route_not_found());
        assert_eq!(
            err.to_string(),
            "Could not find a message handler for URI \"http://example.com/missing\"."
        );
    }

    #[test]
    fn conflicting_patterns_are_rejected() {
        let err = router()
            .route("http://example.com/chat/{channel}", "other")
            .unwrap_err();
        assert!(matches!(err, Error::RouteConflict { ref pattern, .. } if pattern == "http://example.com/chat/{channel}"));
    }

    #[test]
    fn duplicate_patterns_are_rejected() {
        let mut router = router();
        assert!(router.insert("http://example.com/calc#add", "again").is_err());
        assert_eq!(router.patterns().len(), 2);
    }
}
