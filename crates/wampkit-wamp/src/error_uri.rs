/// Error type for a URI that no handler serves
pub const NOT_FOUND: &str = "not-found";

/// Maps an error type to the URI sent in CALLERROR replies
pub trait ErrorUriResolver: Send + Sync {
    fn resolve(&self, error_type: &str) -> String;
}

/// Resolves every error type below `https://example.com/error`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorUriResolver;

impl ErrorUriResolver for DefaultErrorUriResolver {
    fn resolve(&self, error_type: &str) -> String {
        match error_type {
            NOT_FOUND => "https://example.com/error#not-found".to_string(),
            _ => "https://example.com/error#generic".to_string(),
        }
    }
}

impl<F> ErrorUriResolver for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve(&self, error_type: &str) -> String {
        self(error_type)
    }
}
