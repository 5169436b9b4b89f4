use agent_contract::CommandResult;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Body POSTed to the invoke endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvokeRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub tool: String,
    pub parameters: Value,
}

impl InvokeRequest {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        tool: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "invoke_tool",
            client_id: client_id.into(),
            tool: tool.into(),
            parameters,
        }
    }
}

/// Fresh message id for one invocation.
pub fn new_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

/// Normalized tool output: a payload plus an optional failure message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self, command_id: &str) -> CommandResult {
        match self.error {
            None => CommandResult::success(command_id, self.payload),
            Some(error) => CommandResult::failure(command_id, error, self.payload),
        }
    }
}

/// How the server answered the invoke POST.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeReply {
    /// Result carried in the response body.
    Immediate(ToolOutput),
    /// Result will arrive on the event stream under `correlation_id`.
    Deferred { correlation_id: String },
}

/// Classifies a 2xx invoke response body.
pub fn parse_invoke_reply(message_id: &str, body: &str) -> InvokeReply {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return InvokeReply::Deferred {
            correlation_id: message_id.to_string(),
        };
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return InvokeReply::Immediate(ToolOutput::ok(json!({ "text": trimmed })));
    };

    if let Some(correlation_id) = value
        .get("correlationId")
        .or_else(|| value.get("correlation_id"))
        .and_then(Value::as_str)
    {
        return InvokeReply::Deferred {
            correlation_id: correlation_id.to_string(),
        };
    }

    let status = value.get("status").and_then(Value::as_str);
    if matches!(status, Some("accepted" | "pending" | "queued")) {
        return InvokeReply::Deferred {
            correlation_id: message_id.to_string(),
        };
    }

    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        return InvokeReply::Immediate(ToolOutput::failed(error_text(error), value.clone()));
    }

    if value.get("isError").and_then(Value::as_bool) == Some(true) {
        let payload = extract_tool_content(value.get("content").unwrap_or(&value));
        return InvokeReply::Immediate(ToolOutput::failed(tool_error_message(&payload), payload));
    }

    if let Some(result) = value.get("result") {
        return InvokeReply::Immediate(ToolOutput::ok(extract_tool_content(result)));
    }

    if value.get("content").is_some() {
        return InvokeReply::Immediate(ToolOutput::ok(extract_tool_content(&value)));
    }

    InvokeReply::Immediate(ToolOutput::ok(value))
}

/// Unwraps the `content[0].text` envelope tool servers use.
///
/// The text is parsed as JSON when possible and wrapped as `{"text": ...}`
/// otherwise. Values without the envelope pass through unchanged.
pub fn extract_tool_content(value: &Value) -> Value {
    let inner = value.get("content").unwrap_or(value);
    let inner = match inner.get("content") {
        Some(nested @ Value::Array(_)) => nested,
        _ => inner,
    };

    let Some(first) = inner.as_array().and_then(|items| items.first()) else {
        return value.clone();
    };

    match first.get("text").and_then(Value::as_str) {
        Some(text) => serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| json!({ "text": text })),
        None => first.clone(),
    }
}

/// Failure message for tool content flagged as an error.
pub fn tool_error_message(payload: &Value) -> String {
    payload
        .get("error")
        .map(error_text)
        .or_else(|| {
            payload
                .get("text")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "tool reported an error".to_string())
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => message_field(fields).unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

fn message_field(fields: &Map<String, Value>) -> Option<String> {
    fields
        .get("message")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{extract_tool_content, parse_invoke_reply, InvokeReply, InvokeRequest, ToolOutput};

    #[test]
    fn invoke_request_wire_shape() {
        let request = InvokeRequest::new("msg-1", "client-9", "listFiles", json!({"path": "/tmp"}));
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({
                "id": "msg-1",
                "type": "invoke_tool",
                "clientId": "client-9",
                "tool": "listFiles",
                "parameters": {"path": "/tmp"}
            })
        );
    }

    #[test]
    fn extracts_json_text_content() {
        let value = json!({
            "content": {"content": [{"type": "text", "text": "{\"files\":[\"a.txt\"]}"}]}
        });
        assert_eq!(extract_tool_content(&value), json!({"files": ["a.txt"]}));

        let plain = json!({"content": [{"type": "text", "text": "done"}]});
        assert_eq!(extract_tool_content(&plain), json!({"text": "done"}));

        let bare = json!({"files": []});
        assert_eq!(extract_tool_content(&bare), bare);
    }

    #[test]
    fn classifies_deferred_replies() {
        assert_eq!(
            parse_invoke_reply("msg-1", ""),
            InvokeReply::Deferred {
                correlation_id: "msg-1".to_string()
            }
        );
        assert_eq!(
            parse_invoke_reply("msg-1", r#"{"status":"accepted"}"#),
            InvokeReply::Deferred {
                correlation_id: "msg-1".to_string()
            }
        );
        assert_eq!(
            parse_invoke_reply("msg-1", r#"{"correlationId":"srv-7"}"#),
            InvokeReply::Deferred {
                correlation_id: "srv-7".to_string()
            }
        );
    }

    #[test]
    fn classifies_immediate_replies() {
        assert_eq!(
            parse_invoke_reply(
                "msg-1",
                r#"{"result":{"content":[{"type":"text","text":"{\"ok\":true}"}]}}"#
            ),
            InvokeReply::Immediate(ToolOutput::ok(json!({"ok": true})))
        );
        assert_eq!(
            parse_invoke_reply("msg-1", r#"{"error":{"message":"no such tool"}}"#),
            InvokeReply::Immediate(ToolOutput::failed(
                "no such tool",
                json!({"error": {"message": "no such tool"}})
            ))
        );
        assert_eq!(
            parse_invoke_reply("msg-1", "plain words"),
            InvokeReply::Immediate(ToolOutput::ok(json!({"text": "plain words"})))
        );

        let flagged = parse_invoke_reply(
            "msg-1",
            r#"{"isError":true,"content":[{"type":"text","text":"permission denied"}]}"#,
        );
        assert_eq!(
            flagged,
            InvokeReply::Immediate(ToolOutput::failed(
                "permission denied",
                json!({"text": "permission denied"})
            ))
        );
    }

    #[test]
    fn tool_output_becomes_command_result() {
        let result = ToolOutput::failed("boom", json!(null)).into_result("cmd-1");
        assert!(!result.success);
        assert_eq!(result.command_id, "cmd-1");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
