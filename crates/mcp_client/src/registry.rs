use agent_contract::ToolDescriptor;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::McpError;

/// Cached tool catalog for the live session.
///
/// The catalog is refetched whenever the session generation changes. A failed
/// discovery keeps the last good catalog and marks the registry degraded.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    generation: Option<u64>,
    degraded: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Returns the catalog for the current session, fetching it if needed.
    pub async fn discover_tools(
        &mut self,
        connection: &ConnectionManager,
    ) -> Result<Vec<ToolDescriptor>, McpError> {
        let generation = connection.generation().ok_or_else(|| {
            McpError::ToolDiscovery("no live session to discover tools on".to_string())
        })?;
        if self.generation == Some(generation) && !self.degraded {
            return Ok(self.tools.clone());
        }

        let http = connection.http();
        let fetched = http
            .get_json(&http.config().paths.tools)
            .await
            .map_err(|error| McpError::ToolDiscovery(error.to_string()))
            .and_then(|body| parse_tool_list(&body));

        match fetched {
            Ok(tools) => {
                debug!(count = tools.len(), generation, "tool catalog refreshed");
                self.tools = tools;
                self.generation = Some(generation);
                self.degraded = false;
                Ok(self.tools.clone())
            }
            Err(error) => {
                warn!(%error, "tool discovery failed");
                self.degraded = true;
                Err(error)
            }
        }
    }
}

/// Parses a tool listing: a bare array or an object with a `tools` array.
pub fn parse_tool_list(body: &Value) -> Result<Vec<ToolDescriptor>, McpError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(fields) => match fields.get("tools") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(McpError::ToolDiscovery(
                    "response has no tools array".to_string(),
                ))
            }
        },
        _ => {
            return Err(McpError::ToolDiscovery(
                "response is neither an array nor an object".to_string(),
            ))
        }
    };

    let mut tools = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
        else {
            warn!(%item, "skipping tool without a name");
            continue;
        };
        let description = item
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let schema = ["parameters", "inputSchema", "input_schema"]
            .iter()
            .find_map(|key| item.get(*key))
            .cloned()
            .unwrap_or_else(|| json!({}));
        tools.push(ToolDescriptor::new(name, description, schema));
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::parse_tool_list;

    #[test]
    fn accepts_wrapped_and_bare_lists() {
        let wrapped = json!({"tools": [
            {"name": "listFiles", "description": "List a directory",
             "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}}
        ]});
        let tools = parse_tool_list(&wrapped).expect("wrapped");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "listFiles");
        assert_eq!(tools[0].description.as_deref(), Some("List a directory"));

        let bare = json!([{"name": "readFile"}, {"description": "nameless"}]);
        let tools = parse_tool_list(&bare).expect("bare");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].parameter_schema, json!({}));
    }

    #[test]
    fn rejects_unrecognized_shapes() {
        assert!(parse_tool_list(&json!({"items": []})).is_err());
        assert!(parse_tool_list(&json!("tools")).is_err());
    }
}
