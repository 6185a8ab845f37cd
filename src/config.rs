use std::time::Duration;

use crate::error::Error;
use crate::retry::RetryPolicy;

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("reqpipe/", env!("CARGO_PKG_VERSION"));
pub(crate) const DEFAULT_CLIENT_NAME: &str = "reqpipe";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Explicit client configuration, passed once at construction. Nothing is
/// read from the process environment.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub client_name: String,
    /// Bound on each individual attempt, including reading the body.
    pub request_timeout: Duration,
    pub max_response_body_bytes: usize,
    pub retry_policy: RetryPolicy,
    /// Writes outbound requests and inbound responses to the `reqpipe::debug`
    /// tracing target.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            retry_policy: RetryPolicy::standard(),
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                message: "request timeout must be greater than zero".to_owned(),
            });
        }
        if self.max_response_body_bytes == 0 {
            return Err(Error::InvalidConfig {
                message: "max response body bytes must be greater than zero".to_owned(),
            });
        }
        if !self.base_url.is_empty() {
            crate::util::resolve_uri(&self.base_url, "")?;
        }
        crate::util::parse_header_value("user-agent", &self.user_agent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        ClientConfig::new("https://api.example.com/v1")
            .validate()
            .expect("default config is valid");
        ClientConfig::default()
            .validate()
            .expect("empty base url is allowed");
    }

    #[test]
    fn invalid_settings_fail_validation() {
        let cases = [
            ClientConfig::new("https://api.example.com").with_request_timeout(Duration::ZERO),
            ClientConfig::new("https://api.example.com").with_max_response_body_bytes(0),
            ClientConfig::new("ftp://api.example.com"),
            ClientConfig::new("https://api.example.com").with_user_agent("bad\nagent"),
        ];
        for config in cases {
            let error = config.validate().expect_err("invalid config");
            assert_eq!(error.kind(), ErrorKind::Validation);
        }
    }
}
