use serde_json::Value;

/// Normalized event delivered on the tool server's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake event carrying the session clientId.
    Connected { client_id: String },
    ToolProgress {
        id: String,
        content: Value,
    },
    ToolResult {
        id: String,
        content: Value,
        is_error: bool,
        /// Partial results carry intermediate output and do not end the call.
        partial: bool,
    },
    ToolError {
        id: String,
        message: String,
    },
    ToolComplete {
        id: String,
    },
    Ping,
    Unknown {
        event_type: String,
        payload: Value,
    },
}

impl ServerEvent {
    /// Message id this event answers, if it is tool traffic.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ToolProgress { id, .. }
            | Self::ToolResult { id, .. }
            | Self::ToolError { id, .. }
            | Self::ToolComplete { id } => Some(id),
            Self::Connected { .. } | Self::Ping | Self::Unknown { .. } => None,
        }
    }

    /// True when no further events are expected for the correlated call.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::ToolResult { partial, .. } => !partial,
            Self::ToolError { .. } | Self::ToolComplete { .. } => true,
            _ => false,
        }
    }

    /// Maps a decoded `data:` payload. `fallback_type` is the SSE `event:` name.
    pub fn from_value(value: Value, fallback_type: Option<&str>) -> Option<Self> {
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .or(fallback_type)?
            .to_string();

        let event = match event_type.as_str() {
            "connected" | "endpoint" => {
                let client_id = string_field(&value, &["clientId", "client_id", "sessionId"])?;
                Self::Connected { client_id }
            }
            "tool_progress" | "progress" => Self::ToolProgress {
                id: string_field(&value, &["id", "correlationId"])?,
                content: value
                    .get("content")
                    .or_else(|| value.get("progress"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            "tool_result" => {
                let content = value.get("content").cloned().unwrap_or(Value::Null);
                let is_error = value
                    .get("isError")
                    .and_then(Value::as_bool)
                    .or_else(|| content.get("isError").and_then(Value::as_bool))
                    .unwrap_or(false);
                Self::ToolResult {
                    id: string_field(&value, &["id", "correlationId"])?,
                    content,
                    is_error,
                    partial: value
                        .get("partial")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }
            }
            "tool_error" | "error" => {
                let id = string_field(&value, &["id", "correlationId"])?;
                let message = value
                    .get("error")
                    .and_then(|error| {
                        error.as_str().map(ToString::to_string).or_else(|| {
                            error
                                .get("message")
                                .and_then(Value::as_str)
                                .map(ToString::to_string)
                        })
                    })
                    .or_else(|| string_field(&value, &["message"]))
                    .unwrap_or_else(|| "tool reported an error".to_string());
                Self::ToolError { id, message }
            }
            "tool_complete" | "complete" => Self::ToolComplete {
                id: string_field(&value, &["id", "correlationId"])?,
            },
            "ping" | "heartbeat" => Self::Ping,
            _ => Self::Unknown {
                event_type,
                payload: value,
            },
        };
        Some(event)
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .map(ToString::to_string)
}
