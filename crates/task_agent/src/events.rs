use agent_contract::{AnalysisOutcome, Command, CommandResult, StopReason, TaskState};
use serde_json::Value;

/// Everything the orchestrator reports to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    StateChanged {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },
    CommandProposed {
        command: Command,
        alternatives: usize,
    },
    CommandUpdated {
        command: Command,
    },
    CommandRejected {
        command: Command,
    },
    Progress {
        command_id: String,
        content: Value,
    },
    ResultReceived {
        result: CommandResult,
    },
    Analysis {
        outcome: AnalysisOutcome,
    },
    Stopped {
        reason: StopReason,
    },
    Completed {
        summary: Option<String>,
    },
    Failed {
        reason: String,
    },
    Notice(String),
}

impl TaskEvent {
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice(message.into())
    }

    /// One-line rendering used by the line-oriented CLI.
    pub fn render(&self) -> String {
        match self {
            Self::StateChanged { from, to, .. } => format!("[state] {from} -> {to}"),
            Self::CommandProposed {
                command,
                alternatives,
            } => {
                let mut line = format!(
                    "[proposal] {} {}",
                    command.tool_name,
                    compact(&command.parameters)
                );
                if !command.explanation.is_empty() {
                    line.push_str(&format!(" ({})", command.explanation));
                }
                if *alternatives > 0 {
                    line.push_str(&format!(" [{alternatives} alternative(s) queued]"));
                }
                line.push_str(" -- /approve, /edit <json> or /reject");
                line
            }
            Self::CommandUpdated { command } => format!(
                "[edited] {} {}",
                command.tool_name,
                compact(&command.parameters)
            ),
            Self::CommandRejected { command } => format!("[rejected] {}", command.tool_name),
            Self::Progress { content, .. } => format!("[progress] {}", compact(content)),
            Self::ResultReceived { result } => match &result.error {
                Some(error) => format!("[result] failed: {error}"),
                None => format!("[result] {}", compact(&result.payload)),
            },
            Self::Analysis { outcome } => {
                let mut line = format!("[analysis] {}", outcome.summary);
                for insight in &outcome.insights {
                    line.push_str(&format!("\n  - {insight}"));
                }
                line
            }
            Self::Stopped { reason } => format!("[stopped] {reason}"),
            Self::Completed { summary } => match summary {
                Some(summary) => format!("[completed] {summary}"),
                None => "[completed]".to_string(),
            },
            Self::Failed { reason } => format!("[failed] {reason}"),
            Self::Notice(message) => message.clone(),
        }
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
