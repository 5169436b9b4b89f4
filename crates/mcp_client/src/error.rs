use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Transport unreachable, bad status on the stream, or stream lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The stream opened but never delivered a `connected` event.
    #[error("no clientId received within {timeout:?}")]
    ClientIdTimeout { timeout: Duration },

    /// clientId missing or expired at execution time.
    #[error("invalid session: clientId is missing or expired")]
    InvalidSession,

    #[error("tool discovery failed: {0}")]
    ToolDiscovery(String),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("reconnect gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
}

impl McpError {
    /// Errors after which the session must be reacquired before retrying.
    #[must_use]
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::InvalidSession | Self::Connection(_))
    }
}

/// Best-effort human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    let message = match value.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(Value::Object(fields)) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => value
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    };

    message
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{parse_error_message, McpError};

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_REQUEST, r#"{"error":"unknown tool"}"#),
            "unknown tool"
        );
        assert_eq!(
            parse_error_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"bad params"}}"#
            ),
            "bad params"
        );
        assert_eq!(
            parse_error_message(StatusCode::NOT_FOUND, r#"{"message":"no route"}"#),
            "no route"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_or_reason() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
    }

    #[test]
    fn session_loss_classification() {
        assert!(McpError::InvalidSession.is_session_loss());
        assert!(McpError::Connection("reset".to_string()).is_session_loss());
        assert!(!McpError::ToolDiscovery("x".to_string()).is_session_loss());
    }
}
