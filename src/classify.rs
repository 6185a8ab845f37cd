use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::util::truncate_body;

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    code: Option<Value>,
}

/// Maps a completed response with status >= 400 into a typed failure.
///
/// Statuses >= 500 become [`Error::ServerError`]; every other status becomes
/// [`Error::ClientError`]. Whether the failure is retried is decided from the
/// status by [`Error::is_retryable`].
pub fn classify(status: StatusCode, body: &[u8], method: &Method, uri: &str) -> Error {
    let (message, code) = extract_message(status, body);
    if status.is_server_error() {
        Error::ServerError {
            status: status.as_u16(),
            code,
            message,
            method: method.clone(),
            uri: uri.to_owned(),
        }
    } else {
        Error::ClientError {
            status: status.as_u16(),
            code,
            message,
            method: method.clone(),
            uri: uri.to_owned(),
        }
    }
}

fn extract_message(status: StatusCode, body: &[u8]) -> (String, Option<String>) {
    let generic = || format!("API error with status code {}", status.as_u16());
    if body.iter().all(u8::is_ascii_whitespace) {
        return (generic(), None);
    }

    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) => {
            let message = field_text(parsed.message)
                .or_else(|| field_text(parsed.error))
                .unwrap_or_else(generic);
            (message, field_text(parsed.code))
        }
        Err(_) => (truncate_body(body), None),
    }
}

fn field_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}
