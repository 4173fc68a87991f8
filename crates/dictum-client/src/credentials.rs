use secrecy::SecretString;
use std::fmt;

/// Supplies the bearer token for each connection attempt
///
/// The connection manager asks for a token every time it opens a transport
/// and passes it through unchanged. Validation and refresh belong to the
/// provider.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<SecretString>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<SecretString> + Send + Sync,
{
    fn bearer_token(&self) -> Option<SecretString> {
        self()
    }
}

/// Provider that always returns the same token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn bearer_token(&self) -> Option<SecretString> {
        Some(self.token.clone())
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticTokenProvider([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_static_provider() {
        let provider = StaticTokenProvider::new("tok");
        let token = provider.bearer_token().unwrap();
        assert_eq!(token.expose_secret(), "tok");
        assert_eq!(format!("{:?}", provider), "StaticTokenProvider([REDACTED])");
    }

    #[test]
    fn test_closure_provider() {
        let provider = || -> Option<SecretString> { None };
        assert!(TokenProvider::bearer_token(&provider).is_none());
    }
}
