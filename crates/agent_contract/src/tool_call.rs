use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::command::Command;

/// Tool invocation extracted from model text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub tool_name: String,
    pub parameters: Value,
    pub explanation: Option<String>,
}

impl ParsedToolCall {
    #[must_use]
    pub fn into_command(self) -> Command {
        Command::new(
            self.tool_name,
            self.parameters,
            self.explanation.unwrap_or_default(),
        )
    }
}

fn think_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?m)^\s*THINK:\s*(.+?)\s*$").expect("think regex must compile")
    })
}

/// Extracts a `TOOL: {"tool": ..., "parameters": ...}` block from model output.
///
/// A preceding `THINK:` line becomes the explanation. Returns `None` when the
/// text carries no well-formed tool block.
pub fn parse_tool_call(text: &str) -> Option<ParsedToolCall> {
    let marker = text.find("TOOL:")?;
    let after_marker = &text[marker + "TOOL:".len()..];
    let start = after_marker.find('{')?;

    let value = serde_json::Deserializer::from_str(&after_marker[start..])
        .into_iter::<Value>()
        .next()?
        .ok()?;

    let tool_name = value.get("tool")?.as_str()?.trim().to_string();
    if tool_name.is_empty() {
        return None;
    }
    let parameters = value.get("parameters")?.clone();

    let explanation = think_regex()
        .captures(&text[..marker])
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string());

    Some(ParsedToolCall {
        tool_name,
        parameters,
        explanation,
    })
}
