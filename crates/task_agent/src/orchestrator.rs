use std::collections::VecDeque;
use std::fmt;

use agent_contract::{
    AnalysisOutcome, AnalysisRequest, CollaboratorError, Command, CommandResult, CommandStatus,
    GenerationRequest, StopReason, Task, TaskError, TaskState, ToolDescriptor,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::approval::{ApprovalError, ApprovalGate, ApprovedCommand};
use crate::events::TaskEvent;
use crate::session::SessionError;

pub type OpId = u64;

pub const DEFAULT_STEP_LIMIT: u32 = 25;

const CANCELLED_BY_USER: &str = "cancelled by user";
const INTERRUPTED: &str = "interrupted before a result was received";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub step_limit: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_step_limit(mut self, step_limit: u32) -> Self {
        self.step_limit = step_limit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Generation,
    Execution,
    Analysis,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generation => "command generation",
            Self::Execution => "command execution",
            Self::Analysis => "result analysis",
        })
    }
}

/// Result of one asynchronous operation started through [`HostOps`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Generated(Result<Vec<Command>, CollaboratorError>),
    Executed(Result<CommandResult, SessionError>),
    Analyzed(Result<AnalysisOutcome, CollaboratorError>),
}

impl OpOutcome {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Generated(_) => OpKind::Generation,
            Self::Executed(_) => OpKind::Execution,
            Self::Analyzed(_) => OpKind::Analysis,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpCompletion {
    pub op_id: OpId,
    pub outcome: OpOutcome,
}

impl OpCompletion {
    pub fn new(op_id: OpId, outcome: OpOutcome) -> Self {
        Self { op_id, outcome }
    }
}

/// Side effects the orchestrator asks its host to perform.
///
/// `start_*` calls return immediately with an operation id; the host later
/// feeds the result back through [`TaskOrchestrator::on_completion`].
pub trait HostOps {
    fn start_generation(&mut self, request: GenerationRequest) -> Result<OpId, String>;
    /// With `reconnect_first` the host reacquires the tool session before invoking.
    fn start_execution(
        &mut self,
        command: ApprovedCommand,
        reconnect_first: bool,
    ) -> Result<OpId, String>;
    fn start_analysis(&mut self, request: AnalysisRequest) -> Result<OpId, String>;
    fn cancel_op(&mut self, op_id: OpId);
    fn persist(&mut self, task: &Task);
    fn archive(&mut self, task: &Task);
    fn notify(&mut self, event: TaskEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Transition(#[from] TaskError),

    #[error("goal must not be empty")]
    EmptyGoal,

    #[error("a task is already in progress (state: {state}); use /cancel first")]
    TaskInProgress { state: TaskState },

    #[error("no active task (state: {state})")]
    NotActive { state: TaskState },

    #[error("step limit of {limit} reached; raise it before resuming")]
    StepLimitReached { limit: u32 },

    #[error("failed to start {kind}: {message}")]
    Host { kind: OpKind, message: String },

    #[error("{0}")]
    Invariant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveOp {
    id: OpId,
    kind: OpKind,
}

/// Drives one task through generate, approve, execute and analyze cycles.
///
/// Dispatch is a `(state, outcome)` match. At most one operation is in flight;
/// completions carrying any other operation id are discarded. Completions that
/// arrive while the task is stopped are parked and applied in arrival order on
/// resume.
#[derive(Debug)]
pub struct TaskOrchestrator {
    task: Task,
    config: OrchestratorConfig,
    tools: Vec<ToolDescriptor>,
    active_op: Option<ActiveOp>,
    parked: VecDeque<OpCompletion>,
    executing: Option<ApprovedCommand>,
    retried: bool,
    archived: bool,
}

impl TaskOrchestrator {
    pub fn new(task: Task, config: OrchestratorConfig) -> Self {
        let archived = task.state.is_terminal();
        Self {
            task,
            config,
            tools: Vec::new(),
            active_op: None,
            parked: VecDeque::new(),
            executing: None,
            retried: false,
            archived,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn set_tools(&mut self, tools: Vec<ToolDescriptor>) {
        self.tools = tools;
    }

    pub fn set_step_limit(&mut self, step_limit: u32) {
        self.config.step_limit = step_limit;
    }

    pub fn active_op(&self) -> Option<OpId> {
        self.active_op.map(|op| op.id)
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    pub fn pending_command(&self) -> Option<&Command> {
        match self.task.state {
            TaskState::AwaitingApproval => self.task.proposal.as_ref(),
            TaskState::Stopped => self
                .task
                .stopped
                .as_ref()
                .filter(|context| context.resume_to == TaskState::AwaitingApproval)
                .and(self.task.proposal.as_ref()),
            _ => None,
        }
    }

    pub fn status_line(&self) -> String {
        let mut line = format!(
            "task {} [{}] {}/{} steps",
            self.task.id,
            self.task.state,
            self.task.executed_steps(),
            self.config.step_limit
        );
        if !self.task.goal.is_empty() {
            line.push_str(&format!(" goal: {}", self.task.goal));
        }
        if let Some(context) = &self.task.stopped {
            line.push_str(&format!(
                " ({}, resumes to {})",
                context.reason, context.resume_to
            ));
        }
        if let Some(reason) = &self.task.failure {
            line.push_str(&format!(" failure: {reason}"));
        }
        line
    }

    /// Starts a new task. Finished tasks are replaced; live ones must be cancelled first.
    pub fn submit_goal(
        &mut self,
        host: &mut dyn HostOps,
        goal: &str,
    ) -> Result<(), OrchestratorError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(OrchestratorError::EmptyGoal);
        }
        if !matches!(
            self.task.state,
            TaskState::Idle | TaskState::Completed | TaskState::Failed
        ) {
            return Err(OrchestratorError::TaskInProgress {
                state: self.task.state,
            });
        }

        self.task = Task::new(goal);
        self.active_op = None;
        self.parked.clear();
        self.executing = None;
        self.retried = false;
        self.archived = false;
        info!(task_id = %self.task.id, goal, "task started");

        let started = self
            .transition(host, TaskState::Generating)
            .and_then(|()| self.begin_generation(host));
        self.settle(host, started);
        Ok(())
    }

    pub fn approve(
        &mut self,
        host: &mut dyn HostOps,
        command_id: &str,
    ) -> Result<(), OrchestratorError> {
        let approved =
            ApprovalGate::new(self.task.state, &mut self.task.proposal).approve(command_id)?;
        info!(command_id, tool = %approved.command().tool_name, "command approved");

        if let Some(proposal) = self.task.proposal.as_mut() {
            proposal.status = CommandStatus::Executing;
        }
        self.retried = false;
        self.executing = Some(approved.clone());

        let started = self.transition(host, TaskState::Executing).and_then(|()| {
            let op = host.start_execution(approved, false);
            self.launch(OpKind::Execution, op)
        });
        self.settle(host, started);
        Ok(())
    }

    pub fn edit(
        &mut self,
        host: &mut dyn HostOps,
        command_id: &str,
        parameters: Value,
    ) -> Result<(), OrchestratorError> {
        let command = ApprovalGate::new(self.task.state, &mut self.task.proposal)
            .edit(command_id, parameters)?;
        self.task.touch();
        host.persist(&self.task);
        host.notify(TaskEvent::CommandUpdated { command });
        Ok(())
    }

    /// Rejects the proposal and returns to generation, promoting queued alternatives first.
    pub fn reject(
        &mut self,
        host: &mut dyn HostOps,
        command_id: &str,
    ) -> Result<(), OrchestratorError> {
        let rejected =
            ApprovalGate::new(self.task.state, &mut self.task.proposal).reject(command_id)?;
        info!(command_id, "command rejected");
        self.task.rejected.push(rejected.clone());
        host.notify(TaskEvent::CommandRejected { command: rejected });

        let regenerated = self
            .transition(host, TaskState::Idle)
            .and_then(|()| self.transition(host, TaskState::Generating))
            .and_then(|()| self.begin_generation(host));
        self.settle(host, regenerated);
        Ok(())
    }

    /// Stops the task. An in-flight operation keeps running and its result is parked.
    pub fn stop(&mut self, host: &mut dyn HostOps) -> Result<(), OrchestratorError> {
        if !self.task.state.is_active() {
            return Err(OrchestratorError::NotActive {
                state: self.task.state,
            });
        }
        self.stop_with(host, StopReason::User)
    }

    pub fn resume(&mut self, host: &mut dyn HostOps) -> Result<(), OrchestratorError> {
        if self.task.state != TaskState::Stopped {
            return Err(TaskError::NotStopped {
                state: self.task.state,
            }
            .into());
        }
        let limit = self.config.step_limit;
        let at_limit = self.task.executed_steps() >= limit as usize;
        if at_limit
            && self.task.stopped.as_ref().is_some_and(|context| {
                matches!(context.reason, StopReason::StepLimitExceeded { .. })
            })
        {
            return Err(OrchestratorError::StepLimitReached { limit });
        }

        let context = self.task.resume()?;
        info!(task_id = %self.task.id, resume_to = %context.resume_to, "task resumed");
        host.persist(&self.task);
        host.notify(TaskEvent::StateChanged {
            task_id: self.task.id.clone(),
            from: TaskState::Stopped,
            to: self.task.state,
        });

        let mut applied = false;
        while self.task.state != TaskState::Stopped && !self.task.state.is_terminal() {
            let Some(completion) = self.parked.pop_front() else {
                break;
            };
            debug!(op_id = completion.op_id, "applying parked completion");
            applied = true;
            self.apply(host, completion.outcome);
        }

        if !applied && self.active_op.is_none() {
            self.drive(host);
        }
        Ok(())
    }

    /// Abandons the task: cancels in-flight work, marks it failed and archives it.
    pub fn cancel(&mut self, host: &mut dyn HostOps) -> Result<(), OrchestratorError> {
        if matches!(self.task.state, TaskState::Idle) || self.task.state.is_terminal() {
            return Err(OrchestratorError::NotActive {
                state: self.task.state,
            });
        }
        self.fail(host, CANCELLED_BY_USER.to_string());
        Ok(())
    }

    /// Restarts whatever the loaded task was doing when it was last saved.
    pub fn recover(&mut self, host: &mut dyn HostOps) {
        match self.task.state {
            TaskState::Idle | TaskState::Completed | TaskState::Failed => {}
            TaskState::Stopped => {
                if let Some(context) = &self.task.stopped {
                    host.notify(TaskEvent::notice(format!(
                        "Restored stopped task '{}' ({}). Use /resume to continue.",
                        self.task.goal, context.reason
                    )));
                }
            }
            state => {
                host.notify(TaskEvent::notice(format!(
                    "Restored task '{}' in state {state}",
                    self.task.goal
                )));
                self.drive(host);
            }
        }
    }

    pub fn on_progress(&mut self, host: &mut dyn HostOps, op_id: OpId, content: Value) {
        let current = self
            .active_op
            .is_some_and(|op| op.id == op_id && op.kind == OpKind::Execution);
        if !current {
            return;
        }
        if let Some(command) = &self.executing {
            host.notify(TaskEvent::Progress {
                command_id: command.id().to_string(),
                content,
            });
        }
    }

    pub fn on_completion(&mut self, host: &mut dyn HostOps, completion: OpCompletion) {
        let Some(active) = self.active_op else {
            debug!(op_id = completion.op_id, "discarding completion with no active operation");
            return;
        };
        if active.id != completion.op_id {
            debug!(
                op_id = completion.op_id,
                active = active.id,
                "discarding stale completion"
            );
            return;
        }
        if active.kind != completion.outcome.kind() {
            warn!(op_id = completion.op_id, expected = %active.kind, "completion kind mismatch");
            return;
        }

        self.active_op = None;
        if self.task.state == TaskState::Stopped {
            debug!(op_id = completion.op_id, "task stopped; parking completion");
            self.parked.push_back(completion);
            return;
        }

        self.apply(host, completion.outcome);
    }

    fn apply(&mut self, host: &mut dyn HostOps, outcome: OpOutcome) {
        let applied = match (self.task.state, outcome) {
            (TaskState::Generating, OpOutcome::Generated(Ok(commands))) => {
                self.on_generated(host, commands)
            }
            (TaskState::Generating, OpOutcome::Generated(Err(error)))
            | (TaskState::Analyzing, OpOutcome::Analyzed(Err(error))) => {
                self.fail(host, error.to_string());
                Ok(())
            }
            (TaskState::Executing, OpOutcome::Executed(Ok(result))) => {
                self.on_result(host, result)
            }
            (TaskState::Executing, OpOutcome::Executed(Err(error))) => {
                self.on_execution_error(host, error)
            }
            (TaskState::Analyzing, OpOutcome::Analyzed(Ok(outcome))) => {
                self.on_outcome(host, outcome)
            }
            (state, outcome) => {
                warn!(%state, kind = %outcome.kind(), "completion does not apply to current state");
                Ok(())
            }
        };
        self.settle(host, applied);
    }

    fn on_generated(
        &mut self,
        host: &mut dyn HostOps,
        commands: Vec<Command>,
    ) -> Result<(), OrchestratorError> {
        let mut commands = commands.into_iter();
        let Some(first) = commands.next() else {
            self.fail(
                host,
                CollaboratorError::Generation("generator returned no commands".to_string())
                    .to_string(),
            );
            return Ok(());
        };
        self.task.pending.extend(commands);
        self.propose(host, first)
    }

    fn on_result(
        &mut self,
        host: &mut dyn HostOps,
        result: CommandResult,
    ) -> Result<(), OrchestratorError> {
        let mut command = self.task.proposal.take().ok_or_else(|| {
            OrchestratorError::Invariant("result arrived with no executing command".to_string())
        })?;
        command.status = if result.success {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        };
        self.executing = None;
        info!(
            command_id = %command.id,
            success = result.success,
            step = self.task.executed_steps() + 1,
            "command result received"
        );

        self.task.record_result(command, result.clone())?;
        host.notify(TaskEvent::ResultReceived { result });
        self.transition(host, TaskState::Analyzing)?;
        self.start_analysis(host)
    }

    fn on_execution_error(
        &mut self,
        host: &mut dyn HostOps,
        error: SessionError,
    ) -> Result<(), OrchestratorError> {
        if error.is_session_loss() && !self.retried {
            if let Some(command) = self.executing.clone() {
                self.retried = true;
                warn!(command_id = command.id(), %error, "retrying command after reconnect");
                host.notify(TaskEvent::notice(format!(
                    "{error}; reconnecting and retrying once"
                )));
                let op = host.start_execution(command, true);
                return self.launch(OpKind::Execution, op);
            }
        }

        self.fail(host, format!("command execution failed: {error}"));
        Ok(())
    }

    fn on_outcome(
        &mut self,
        host: &mut dyn HostOps,
        outcome: AnalysisOutcome,
    ) -> Result<(), OrchestratorError> {
        let complete = outcome.is_task_complete || outcome.follow_up_commands.is_empty();
        let follow_ups = outcome.follow_up_commands.clone();
        let summary = outcome.summary.clone();

        self.task.attach_outcome(outcome.clone())?;
        host.notify(TaskEvent::Analysis { outcome });

        if complete {
            self.transition(host, TaskState::Completed)?;
            info!(task_id = %self.task.id, steps = self.task.executed_steps(), "task completed");
            host.notify(TaskEvent::Completed {
                summary: Some(summary),
            });
            self.archive(host);
            return Ok(());
        }

        // Fresh follow-ups supersede alternatives left over from earlier steps.
        self.task.pending = follow_ups.into();
        self.transition(host, TaskState::Generating)?;
        self.begin_generation(host)
    }

    fn begin_generation(&mut self, host: &mut dyn HostOps) -> Result<(), OrchestratorError> {
        let limit = self.config.step_limit;
        if self.task.executed_steps() >= limit as usize {
            warn!(task_id = %self.task.id, limit, "step limit reached");
            return self.stop_with(host, StopReason::StepLimitExceeded { limit });
        }

        if let Some(next) = self.task.pending.pop_front() {
            return self.propose(host, next);
        }

        let request = GenerationRequest {
            goal: self.task.goal.clone(),
            history: self.task.history.clone(),
            rejected: self.task.rejected.clone(),
            tools: self.tools.clone(),
        };
        let op = host.start_generation(request);
        self.launch(OpKind::Generation, op)
    }

    fn propose(
        &mut self,
        host: &mut dyn HostOps,
        command: Command,
    ) -> Result<(), OrchestratorError> {
        let command = ApprovalGate::new(self.task.state, &mut self.task.proposal)
            .propose(command)?
            .clone();
        self.transition(host, TaskState::AwaitingApproval)?;
        host.notify(TaskEvent::CommandProposed {
            command,
            alternatives: self.task.pending.len(),
        });
        Ok(())
    }

    fn start_analysis(&mut self, host: &mut dyn HostOps) -> Result<(), OrchestratorError> {
        let entry = self.task.next_unanalyzed().ok_or_else(|| {
            OrchestratorError::Invariant("no result waiting for analysis".to_string())
        })?;
        let request = AnalysisRequest {
            goal: self.task.goal.clone(),
            command: entry.command.clone(),
            result: entry.result.clone(),
        };
        let op = host.start_analysis(request);
        self.launch(OpKind::Analysis, op)
    }

    /// Restarts the work owed by the current state when nothing is in flight.
    fn drive(&mut self, host: &mut dyn HostOps) {
        let driven = match self.task.state {
            TaskState::Generating => self.begin_generation(host),
            TaskState::AwaitingApproval => match self.task.proposal.clone() {
                Some(command) => {
                    host.notify(TaskEvent::CommandProposed {
                        command,
                        alternatives: self.task.pending.len(),
                    });
                    Ok(())
                }
                None => Err(OrchestratorError::Invariant(
                    "awaiting approval without a proposal".to_string(),
                )),
            },
            TaskState::Executing => match self.task.proposal.as_ref().map(|c| c.id.clone()) {
                Some(command_id) => {
                    let result = CommandResult::failure(command_id, INTERRUPTED, Value::Null);
                    self.on_result(host, result)
                }
                None => Err(OrchestratorError::Invariant(
                    "executing without a command".to_string(),
                )),
            },
            TaskState::Analyzing => self.start_analysis(host),
            TaskState::Idle | TaskState::Stopped | TaskState::Completed | TaskState::Failed => {
                Ok(())
            }
        };
        self.settle(host, driven);
    }

    fn launch(
        &mut self,
        kind: OpKind,
        started: Result<OpId, String>,
    ) -> Result<(), OrchestratorError> {
        match started {
            Ok(id) => {
                debug!(op_id = id, %kind, "operation started");
                self.active_op = Some(ActiveOp { id, kind });
                Ok(())
            }
            Err(message) => Err(OrchestratorError::Host { kind, message }),
        }
    }

    fn transition(
        &mut self,
        host: &mut dyn HostOps,
        next: TaskState,
    ) -> Result<(), OrchestratorError> {
        let from = self.task.state;
        self.task.transition(next)?;
        debug!(task_id = %self.task.id, %from, to = %next, "task transition");
        host.persist(&self.task);
        host.notify(TaskEvent::StateChanged {
            task_id: self.task.id.clone(),
            from,
            to: next,
        });
        Ok(())
    }

    fn stop_with(
        &mut self,
        host: &mut dyn HostOps,
        reason: StopReason,
    ) -> Result<(), OrchestratorError> {
        let from = self.task.state;
        self.task.stop(reason.clone())?;
        info!(task_id = %self.task.id, %from, %reason, "task stopped");
        host.persist(&self.task);
        host.notify(TaskEvent::StateChanged {
            task_id: self.task.id.clone(),
            from,
            to: TaskState::Stopped,
        });
        host.notify(TaskEvent::Stopped { reason });
        Ok(())
    }

    fn fail(&mut self, host: &mut dyn HostOps, reason: String) {
        if let Some(op) = self.active_op.take() {
            host.cancel_op(op.id);
        }
        self.parked.clear();
        self.executing = None;
        if self.task.state.is_terminal() {
            return;
        }

        let from = self.task.state;
        if let Err(error) = self.task.fail(reason.clone()) {
            error!(task_id = %self.task.id, %error, "could not mark task failed");
            return;
        }
        warn!(task_id = %self.task.id, %from, %reason, "task failed");
        host.persist(&self.task);
        host.notify(TaskEvent::StateChanged {
            task_id: self.task.id.clone(),
            from,
            to: TaskState::Failed,
        });
        host.notify(TaskEvent::Failed { reason });
        self.archive(host);
    }

    fn archive(&mut self, host: &mut dyn HostOps) {
        if !self.archived {
            self.archived = true;
            host.archive(&self.task);
        }
    }

    fn settle(&mut self, host: &mut dyn HostOps, result: Result<(), OrchestratorError>) {
        if let Err(error) = result {
            error!(task_id = %self.task.id, %error, "orchestration step failed");
            self.fail(host, error.to_string());
        }
    }
}
