use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Coarse classification of a failed logical operation.
///
/// `Network` and `ServerError` are transient. `ClientError` is terminal except
/// for request-timeout (408) and rate-limit (429) statuses, see
/// [`Error::is_retryable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    ServerError,
    ClientError,
    Validation,
    Internal,
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Network,
    ServerStatus,
    ClientStatus,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidConfig,
    SerializeJson,
    Deserialize,
    ResponseBodyTooLarge,
    Cancelled,
    DeadlineExceeded,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ServerStatus => "server_status",
            Self::ClientStatus => "client_status",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::InvalidConfig => "invalid_config",
            Self::SerializeJson => "serialize_json",
            Self::Deserialize => "deserialize",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("network error ({kind}) for {method} {uri}: {source}")]
    Network {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("server error {status} for {method} {uri}: {message}")]
    ServerError {
        status: u16,
        code: Option<String>,
        message: String,
        method: Method,
        uri: String,
    },
    #[error("client error {status} for {method} {uri}: {message}")]
    ClientError {
        status: u16,
        code: Option<String>,
        message: String,
        method: Method,
        uri: String,
    },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("invalid client configuration: {message}")]
    InvalidConfig { message: String },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::ClientError { .. } => ErrorKind::ClientError,
            Self::InvalidUri { .. }
            | Self::InvalidHeaderName { .. }
            | Self::InvalidHeaderValue { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Validation,
            Self::Serialize { .. }
            | Self::Deserialize { .. }
            | Self::ResponseBodyTooLarge { .. } => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Network { .. } => ErrorCode::Network,
            Self::ServerError { .. } => ErrorCode::ServerStatus,
            Self::ClientError { .. } => ErrorCode::ClientStatus,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        }
    }

    /// HTTP status observed for this failure, if any response was received.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } | Self::ClientError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable code reported by the API in the error body.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::ServerError { code, .. } | Self::ClientError { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Human message reported by the API, or the raw body when it was not JSON.
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Self::ServerError { message, .. } | Self::ClientError { message, .. } => {
                Some(message.as_str())
            }
            _ => None,
        }
    }

    pub const fn transport_error_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::ServerError { .. } => true,
            Self::ClientError { status, .. } => is_transient_client_status(*status),
            _ => false,
        }
    }

    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

pub(crate) const fn is_transient_client_status(status: u16) -> bool {
    matches!(status, 408 | 429)
}
