use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::now_rfc3339;

/// Identifier for one proposed command.
pub type CommandId = String;

/// Lifecycle of a single command inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Proposed,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true once the command can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }
}

/// One tool invocation proposed by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub tool_name: String,
    pub parameters: Value,
    pub explanation: String,
    pub status: CommandStatus,
}

impl Command {
    /// Creates a freshly proposed command with a generated id.
    #[must_use]
    pub fn new(
        tool_name: impl Into<String>,
        parameters: Value,
        explanation: impl Into<String>,
    ) -> Self {
        Self::with_id(
            format!("cmd-{}", Uuid::new_v4()),
            tool_name,
            parameters,
            explanation,
        )
    }

    /// Creates a proposed command with a caller-chosen id.
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Value,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters,
            explanation: explanation.into(),
            status: CommandStatus::Proposed,
        }
    }
}

/// Outcome of executing one command on the tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    pub command_id: CommandId,
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
    pub received_at: String,
}

impl CommandResult {
    /// Constructs a successful result.
    #[must_use]
    pub fn success(command_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("res-{}", Uuid::new_v4()),
            command_id: command_id.into(),
            success: true,
            payload,
            error: None,
            received_at: now_rfc3339(),
        }
    }

    /// Constructs a failed result. Failures are analyzed like successes.
    #[must_use]
    pub fn failure(
        command_id: impl Into<String>,
        error: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: format!("res-{}", Uuid::new_v4()),
            command_id: command_id.into(),
            success: false,
            payload,
            error: Some(error.into()),
            received_at: now_rfc3339(),
        }
    }
}

/// Analyzer verdict for exactly one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub result_id: String,
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub follow_up_commands: Vec<Command>,
    pub is_task_complete: bool,
}

impl AnalysisOutcome {
    /// Outcome that ends the task.
    #[must_use]
    pub fn complete(result_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            result_id: result_id.into(),
            summary: summary.into(),
            insights: Vec::new(),
            follow_up_commands: Vec::new(),
            is_task_complete: true,
        }
    }

    /// Outcome that continues the task with follow-up commands.
    #[must_use]
    pub fn continue_with(
        result_id: impl Into<String>,
        summary: impl Into<String>,
        follow_up_commands: Vec<Command>,
    ) -> Self {
        Self {
            result_id: result_id.into(),
            summary: summary.into(),
            insights: Vec::new(),
            follow_up_commands,
            is_task_complete: false,
        }
    }

    #[must_use]
    pub fn with_insights(mut self, insights: Vec<String>) -> Self {
        self.insights = insights;
        self
    }
}
