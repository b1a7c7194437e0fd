use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Per-field messages returned by the backend for a rejected form.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors surfaced by the marketplace client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Input rejected locally before any request was made.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// The backend answered 401 and no retry was possible.
    #[error("Not authenticated")]
    Unauthorized,

    /// Credential refresh failed; the local session has been cleared.
    #[error("Session expired, please log in again")]
    SessionExpired,

    /// The backend rejected the request.
    #[error("Request failed with status {status}: {message}")]
    Api {
        status: u16,
        message: String,
        field_errors: FieldErrors,
    },

    /// The backend could not be reached.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with an unexpected shape.
    #[error("Unexpected response: {0}")]
    Protocol(String),

    /// Realtime channel failure.
    #[error("Socket error: {0}")]
    Socket(String),

    /// Local session storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A `Result` type that uses `ClientError` as the error type.
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Builds an `Api` error from a non-success response body.
    ///
    /// The message is taken from `message`, `error` or `detail` (first one
    /// present). Any other key whose value is a string or list of strings
    /// is treated as a field error.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let mut field_errors = FieldErrors::new();
        let mut message = None;

        if let Value::Object(map) = body {
            for key in ["message", "error", "detail"] {
                if let Some(Value::String(text)) = map.get(key) {
                    message = Some(text.clone());
                    break;
                }
            }

            for (key, value) in map {
                if matches!(key.as_str(), "message" | "error" | "detail" | "success") {
                    continue;
                }
                let messages = match value {
                    Value::String(text) => vec![text.clone()],
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect(),
                    _ => continue,
                };
                if !messages.is_empty() {
                    field_errors.insert(key.clone(), messages);
                }
            }
        }

        let message = message
            .or_else(|| {
                field_errors
                    .values()
                    .next()
                    .and_then(|messages| messages.first().cloned())
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        ClientError::Api {
            status,
            message,
            field_errors,
        }
    }

    /// First backend message attached to `field`, if any.
    pub fn field_error(&self, field: &str) -> Option<&str> {
        match self {
            ClientError::Api { field_errors, .. } => field_errors
                .get(field)
                .and_then(|messages| messages.first())
                .map(String::as_str),
            ClientError::Validation {
                field: name,
                message,
            } if name == field => Some(message.as_str()),
            _ => None,
        }
    }

    /// True for failures the user can reasonably retry by hand.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Socket(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Unauthorized | ClientError::SessionExpired => Some(401),
            ClientError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_prefers_message_then_error_then_detail() {
        let err = ClientError::from_response(400, &json!({"detail": "d", "error": "e"}));
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "e"));

        let err = ClientError::from_response(400, &json!({"detail": "only detail"}));
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "only detail"));
    }

    #[test]
    fn field_errors_are_collected() {
        let err = ClientError::from_response(
            400,
            &json!({"otp": ["Invalid or expired OTP"], "phone": "Required"}),
        );
        assert_eq!(err.field_error("otp"), Some("Invalid or expired OTP"));
        assert_eq!(err.field_error("phone"), Some("Required"));
        // no top-level message: first field error is used
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Invalid or expired OTP"));
    }

    #[test]
    fn non_object_body_falls_back_to_status() {
        let err = ClientError::from_response(502, &Value::Null);
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "HTTP 502"));
        assert!(err.is_retryable());
    }
}
