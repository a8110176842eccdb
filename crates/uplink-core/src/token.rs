//! Credential provider boundary.
//!
//! The core never issues or refreshes tokens; it reads the current one
//! from a [`TokenProvider`] on every connect attempt, so an external
//! auth module can rotate credentials underneath a long-lived client.

/// Supplies the current bearer token.
pub trait TokenProvider: Send + Sync {
    /// The token to present on the next handshake, if any.
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token that never rotates.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a fixed token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Anonymous access: no token is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn token(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_static_token() {
        let provider = StaticToken::new("bearer-abc");
        assert_eq!(provider.token(), Some("bearer-abc".to_string()));
        assert_eq!(provider.token(), Some("bearer-abc".to_string()));
    }

    #[test]
    fn test_no_token() {
        assert_eq!(NoToken.token(), None);
    }

    #[test]
    fn test_closure_provider_rotates() {
        let counter = Arc::new(AtomicU32::new(0));
        let provider = {
            let counter = Arc::clone(&counter);
            move || Some(format!("token-{}", counter.fetch_add(1, Ordering::SeqCst)))
        };

        assert_eq!(provider.token(), Some("token-0".to_string()));
        assert_eq!(provider.token(), Some("token-1".to_string()));
    }
}
