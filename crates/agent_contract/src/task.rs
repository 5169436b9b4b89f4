use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::now_rfc3339;
use crate::command::{AnalysisOutcome, Command, CommandResult};

/// Orchestrator state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Generating,
    AwaitingApproval,
    Executing,
    Analyzing,
    Stopped,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Analyzing => "analyzing",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// States in which the Cycle-of-Thought is in progress.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Generating | Self::AwaitingApproval | Self::Executing | Self::Analyzing
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward transition table. Leaving `Stopped` goes through [`Task::resume`].
    #[must_use]
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        match (self, next) {
            (Idle, Generating)
            | (Generating, AwaitingApproval)
            | (AwaitingApproval, Executing | Idle)
            | (Executing, Analyzing)
            | (Analyzing, Generating | Completed) => true,
            (from, Stopped) => from.is_active(),
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task was stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    User,
    StepLimitExceeded { limit: u32 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("stopped by user"),
            Self::StepLimitExceeded { limit } => {
                write!(f, "step limit exceeded after {limit} executed commands")
            }
        }
    }
}

/// Where a stopped task continues from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedContext {
    pub resume_to: TaskState,
    pub reason: StopReason,
}

/// One executed command with its result and, once analyzed, its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: Command,
    pub result: CommandResult,
    pub outcome: Option<AnalysisOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("illegal task transition {from} -> {to}")]
    IllegalTransition { from: TaskState, to: TaskState },

    #[error("task is not stopped (state: {state})")]
    NotStopped { state: TaskState },

    #[error("result '{result_id}' references command '{found}', expected '{expected}'")]
    ResultMismatch {
        result_id: String,
        expected: String,
        found: String,
    },

    #[error("no unanalyzed result '{result_id}' in task history")]
    UnknownResult { result_id: String },
}

/// Root aggregate: one goal pursued through repeated command cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub state: TaskState,
    pub history: Vec<HistoryEntry>,
    /// Follow-ups and alternatives waiting to be proposed, front first.
    #[serde(default)]
    pub pending: VecDeque<Command>,
    /// Command awaiting approval or currently executing.
    #[serde(default)]
    pub proposal: Option<Command>,
    #[serde(default)]
    pub rejected: Vec<Command>,
    #[serde(default)]
    pub stopped: Option<StoppedContext>,
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            goal: goal.into(),
            state: TaskState::Idle,
            history: Vec::new(),
            pending: VecDeque::new(),
            proposal: None,
            rejected: Vec::new(),
            stopped: None,
            failure: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Fresh task with no goal, used when nothing usable was persisted.
    #[must_use]
    pub fn idle() -> Self {
        Self::new("")
    }

    /// Number of commands that reached the tool server.
    #[must_use]
    pub fn executed_steps(&self) -> usize {
        self.history.len()
    }

    pub fn transition(&mut self, next: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }

        if next == TaskState::Stopped {
            return self.stop(StopReason::User);
        }

        self.stopped = None;
        self.state = next;
        self.touch();
        Ok(())
    }

    pub fn stop(&mut self, reason: StopReason) -> Result<(), TaskError> {
        if !self.state.can_transition_to(TaskState::Stopped) {
            return Err(TaskError::IllegalTransition {
                from: self.state,
                to: TaskState::Stopped,
            });
        }

        self.stopped = Some(StoppedContext {
            resume_to: self.state,
            reason,
        });
        self.state = TaskState::Stopped;
        self.touch();
        Ok(())
    }

    /// Returns to the state the task was stopped in.
    pub fn resume(&mut self) -> Result<StoppedContext, TaskError> {
        if self.state != TaskState::Stopped {
            return Err(TaskError::NotStopped { state: self.state });
        }
        let context = self
            .stopped
            .take()
            .ok_or(TaskError::NotStopped { state: self.state })?;

        self.state = context.resume_to;
        self.touch();
        Ok(context)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskState::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Appends an executed command and its result; the outcome follows later.
    pub fn record_result(
        &mut self,
        command: Command,
        result: CommandResult,
    ) -> Result<(), TaskError> {
        if result.command_id != command.id {
            return Err(TaskError::ResultMismatch {
                result_id: result.id,
                expected: command.id,
                found: result.command_id,
            });
        }

        self.history.push(HistoryEntry {
            command,
            result,
            outcome: None,
        });
        self.touch();
        Ok(())
    }

    /// Attaches an analysis outcome to its result. Each result is analyzed at most once.
    pub fn attach_outcome(&mut self, outcome: AnalysisOutcome) -> Result<(), TaskError> {
        let Some(entry) = self
            .history
            .iter_mut()
            .find(|entry| entry.result.id == outcome.result_id && entry.outcome.is_none())
        else {
            return Err(TaskError::UnknownResult {
                result_id: outcome.result_id,
            });
        };

        entry.outcome = Some(outcome);
        self.touch();
        Ok(())
    }

    /// Oldest history entry still waiting for analysis.
    #[must_use]
    pub fn next_unanalyzed(&self) -> Option<&HistoryEntry> {
        self.history.iter().find(|entry| entry.outcome.is_none())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}
