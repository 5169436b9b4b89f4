use agent_contract::{Command, CommandStatus, TaskState};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("no command is awaiting approval (task state: {state})")]
    NotAwaitingApproval { state: TaskState },

    #[error("a command is already awaiting approval: {pending}")]
    ProposalPending { pending: String },

    #[error("command '{found}' is not the pending proposal '{expected}'")]
    UnknownCommand { expected: String, found: String },

    #[error("command parameters must be a JSON object, got {found}")]
    InvalidParameters { found: String },
}

/// Proof that a command passed human approval.
///
/// Only [`ApprovalGate::approve`] mints values of this type, and execution
/// accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedCommand {
    command: Command,
}

impl ApprovedCommand {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn id(&self) -> &str {
        &self.command.id
    }
}

/// Approval checkpoint over the task's single pending proposal.
pub struct ApprovalGate<'a> {
    state: TaskState,
    proposal: &'a mut Option<Command>,
}

impl<'a> ApprovalGate<'a> {
    pub fn new(state: TaskState, proposal: &'a mut Option<Command>) -> Self {
        Self { state, proposal }
    }

    pub fn pending(&self) -> Option<&Command> {
        self.proposal.as_ref()
    }

    /// Parks a freshly generated command for review.
    pub fn propose(&mut self, mut command: Command) -> Result<&Command, ApprovalError> {
        if let Some(pending) = self.proposal.as_ref() {
            return Err(ApprovalError::ProposalPending {
                pending: pending.id.clone(),
            });
        }

        command.status = CommandStatus::Proposed;
        Ok(self.proposal.insert(command))
    }

    pub fn approve(&mut self, command_id: &str) -> Result<ApprovedCommand, ApprovalError> {
        let command = self.matching(command_id)?;
        command.status = CommandStatus::Approved;
        Ok(ApprovedCommand {
            command: command.clone(),
        })
    }

    /// Replaces the parameters of the pending proposal before approval.
    pub fn edit(&mut self, command_id: &str, parameters: Value) -> Result<Command, ApprovalError> {
        if !parameters.is_object() {
            return Err(ApprovalError::InvalidParameters {
                found: json_kind(&parameters).to_string(),
            });
        }

        let command = self.matching(command_id)?;
        command.parameters = parameters;
        Ok(command.clone())
    }

    /// Withdraws the pending proposal and returns it marked rejected.
    pub fn reject(&mut self, command_id: &str) -> Result<Command, ApprovalError> {
        self.matching(command_id)?;
        let mut command = self
            .proposal
            .take()
            .ok_or(ApprovalError::NotAwaitingApproval { state: self.state })?;
        command.status = CommandStatus::Rejected;
        Ok(command)
    }

    fn matching(&mut self, command_id: &str) -> Result<&mut Command, ApprovalError> {
        if self.state != TaskState::AwaitingApproval {
            return Err(ApprovalError::NotAwaitingApproval { state: self.state });
        }

        let state = self.state;
        let command = self
            .proposal
            .as_mut()
            .ok_or(ApprovalError::NotAwaitingApproval { state })?;
        if command.id != command_id {
            return Err(ApprovalError::UnknownCommand {
                expected: command.id.clone(),
                found: command_id.to_string(),
            });
        }

        Ok(command)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
