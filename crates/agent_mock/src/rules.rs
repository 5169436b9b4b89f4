use agent_contract::{
    parse_tool_call, AnalysisOutcome, AnalysisRequest, CollaboratorError, Command,
    CommandGenerator, GenerationRequest, ResultAnalyzer,
};
use async_trait::async_trait;
use serde_json::Value;

/// Stable identifier used for explicit startup selection.
pub const RULES_PLANNER_ID: &str = "rules";

struct Rule {
    keywords: &'static [&'static str],
    response: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        keywords: &["files", "directory"],
        response: r#"THINK: The goal asks about the contents of a directory, so list it.
TOOL: {"tool": "readDirectory", "parameters": {"dirPath": "."}}"#,
    },
    Rule {
        keywords: &["create", "file"],
        response: r#"THINK: The goal asks for a new file, so create one with sample content.
TOOL: {"tool": "createFile", "parameters": {"filePath": "sample-file.txt", "content": "This is a sample file created by the task agent"}}"#,
    },
    Rule {
        keywords: &["run", "command"],
        response: r#"THINK: The goal asks to run a shell command, so run a harmless listing.
TOOL: {"tool": "runShellCommand", "parameters": {"command": "ls"}}"#,
    },
];

/// Keyword planner that proposes one canned tool call per goal.
///
/// Useful for driving the agent against a real tool server without a model.
#[derive(Debug, Default)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    /// Model-style text for `goal`, or `None` when no rule applies.
    pub fn respond(goal: &str) -> Option<&'static str> {
        let goal = goal.to_lowercase();
        RULES
            .iter()
            .find(|rule| rule.keywords.iter().all(|keyword| goal.contains(keyword)))
            .map(|rule| rule.response)
    }
}

#[async_trait]
impl CommandGenerator for RuleBasedPlanner {
    fn id(&self) -> &str {
        RULES_PLANNER_ID
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<Vec<Command>, CollaboratorError> {
        let response = Self::respond(&request.goal).ok_or_else(|| {
            CollaboratorError::Generation(format!("no tool applies to goal '{}'", request.goal))
        })?;
        let call = parse_tool_call(response).ok_or_else(|| {
            CollaboratorError::Generation("planner produced no tool block".to_string())
        })?;

        if !request.tools.is_empty()
            && !request.tools.iter().any(|tool| tool.name == call.tool_name)
        {
            return Err(CollaboratorError::Generation(format!(
                "tool '{}' is not offered by the server",
                call.tool_name
            )));
        }
        if request
            .rejected
            .iter()
            .any(|rejected| {
                rejected.tool_name == call.tool_name && rejected.parameters == call.parameters
            })
        {
            return Err(CollaboratorError::Generation(
                "the only applicable command was rejected".to_string(),
            ));
        }

        Ok(vec![call.into_command()])
    }
}

/// Analyzer that summarizes a single result and always completes the task.
#[derive(Debug, Default)]
pub struct SummaryAnalyzer;

#[async_trait]
impl ResultAnalyzer for SummaryAnalyzer {
    fn id(&self) -> &str {
        RULES_PLANNER_ID
    }

    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisOutcome, CollaboratorError> {
        let result = &request.result;
        if let Some(error) = result.error.as_deref().filter(|_| !result.success) {
            return Ok(AnalysisOutcome::complete(
                &result.id,
                format!("I tried to help, but encountered an error: {error}"),
            ));
        }

        let summary = match request.command.tool_name.as_str() {
            "readDirectory" => format!(
                "I found {} files and {} directories in the current location.",
                count(&result.payload, "files"),
                count(&result.payload, "directories")
            ),
            "createFile" => format!(
                "I've created the file '{}' with the content you requested.",
                request
                    .command
                    .parameters
                    .get("filePath")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
            ),
            "runShellCommand" => format!(
                "I ran the command and here's what I found: {}",
                result.payload
            ),
            _ => format!("I executed the tool and got this result: {}", result.payload),
        };
        Ok(AnalysisOutcome::complete(&result.id, summary))
    }
}

fn count(payload: &Value, key: &str) -> usize {
    payload.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}
