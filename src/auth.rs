/// Supplies the `Authorization` header value for outbound requests.
///
/// Returning `None` (or an empty string) sends the request without the
/// header. Token acquisition and refresh live behind this trait.
pub trait AuthTokenProvider: Send + Sync {
    fn authorization(&self) -> Option<String>;
}

/// A fixed header value, e.g. `Bearer <token>`.
#[derive(Clone)]
pub struct StaticAuthToken {
    value: String,
}

impl StaticAuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::new(format!("Bearer {}", token.as_ref()))
    }
}

impl std::fmt::Debug for StaticAuthToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StaticAuthToken")
            .field("value", &"<redacted>")
            .finish()
    }
}

impl AuthTokenProvider for StaticAuthToken {
    fn authorization(&self) -> Option<String> {
        if self.value.is_empty() {
            None
        } else {
            Some(self.value.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthTokenProvider, StaticAuthToken};

    #[test]
    fn bearer_prefixes_token() {
        let token = StaticAuthToken::bearer("sk_live_1");
        assert_eq!(token.authorization().as_deref(), Some("Bearer sk_live_1"));
        assert!(!format!("{token:?}").contains("sk_live_1"));
    }

    #[test]
    fn empty_value_means_no_header() {
        assert_eq!(StaticAuthToken::new("").authorization(), None);
    }
}
