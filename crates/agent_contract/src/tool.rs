use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invocable tool advertised by the tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameter_schema: Value,
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        parameter_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            parameter_schema,
        }
    }

    /// Parameter names with their required flag and description.
    ///
    /// Accepts both JSON Schema objects (`properties` + `required`) and the flat
    /// `{name: {required, description}}` shape some tool servers publish.
    pub fn parameters(&self) -> Vec<(String, bool, String)> {
        let Some(object) = self.parameter_schema.as_object() else {
            return Vec::new();
        };

        if let Some(properties) = object.get("properties").and_then(Value::as_object) {
            let required: Vec<&str> = object
                .get("required")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            return properties
                .iter()
                .map(|(name, schema)| {
                    (
                        name.clone(),
                        required.contains(&name.as_str()),
                        describe(schema),
                    )
                })
                .collect();
        }

        object
            .iter()
            .filter(|(_, info)| info.is_object())
            .map(|(name, info)| {
                let required = info
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (name.clone(), required, describe(info))
            })
            .collect()
    }
}

fn describe(schema: &Value) -> String {
    schema
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Renders a plain-text tool catalog for model prompts.
pub fn render_tool_catalog(tools: &[ToolDescriptor]) -> String {
    tools
        .iter()
        .map(|tool| {
            let mut block = format!(
                "{}: {}\nParameters:",
                tool.name,
                tool.description.as_deref().unwrap_or("No description")
            );
            for (name, required, description) in tool.parameters() {
                let marker = if required { "(Required)" } else { "(Optional)" };
                block.push_str(&format!("\n    - {name} {marker}: {description}"));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
