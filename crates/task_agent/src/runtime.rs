use std::future::Future;
use std::sync::Arc;

use agent_contract::{
    render_tool_catalog, AnalysisRequest, CommandGenerator, GenerationRequest, ResultAnalyzer,
    Task, ToolDescriptor,
};
use serde_json::Value;
use session_store::TaskStore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalError, ApprovedCommand};
use crate::commands::{SlashCommand, UserInput, HELP_TEXT};
use crate::events::TaskEvent;
use crate::orchestrator::{
    HostOps, OpCompletion, OpId, OpOutcome, OrchestratorConfig, OrchestratorError,
    TaskOrchestrator,
};
use crate::session::{ProgressSink, SessionError, ToolSession};

/// Collaborators the runtime drives.
pub struct RuntimeDeps<S: ToolSession> {
    pub session: Arc<S>,
    pub generator: Arc<dyn CommandGenerator>,
    pub analyzer: Arc<dyn ResultAnalyzer>,
    pub store: TaskStore,
    pub session_key: String,
}

#[derive(Debug)]
enum RuntimeMessage {
    Progress {
        op_id: OpId,
        content: Value,
    },
    Completed(OpCompletion),
    /// A retried execution acquired a new session.
    SessionRenewed {
        client_id: String,
    },
    ToolsDiscovered {
        discovery_id: u64,
        announce: bool,
        discovered: Result<Vec<ToolDescriptor>, SessionError>,
    },
}

/// Cloneable input side of a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    inputs: UnboundedSender<UserInput>,
}

impl RuntimeHandle {
    /// Returns false once the runtime has exited.
    pub fn send(&self, input: UserInput) -> bool {
        self.inputs.send(input).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Single orchestration loop for one session key.
///
/// User input is polled before operation completions, so a stop lands within
/// one loop tick.
pub struct Runtime<S: ToolSession> {
    orchestrator: TaskOrchestrator,
    host: RuntimeHost<S>,
    inputs: UnboundedReceiver<UserInput>,
    messages: UnboundedReceiver<RuntimeMessage>,
}

impl<S: ToolSession> Runtime<S> {
    /// Loads the session's task from the store and wires the loop.
    pub fn new(
        deps: RuntimeDeps<S>,
        config: OrchestratorConfig,
        events: UnboundedSender<TaskEvent>,
    ) -> (Self, RuntimeHandle) {
        let (input_tx, inputs) = mpsc::unbounded_channel();
        let (message_tx, messages) = mpsc::unbounded_channel();
        let task = deps.store.load(&deps.session_key);
        info!(
            session_key = %deps.session_key,
            task_id = %task.id,
            state = %task.state,
            "session loaded"
        );

        let runtime = Self {
            orchestrator: TaskOrchestrator::new(task, config),
            host: RuntimeHost {
                session: deps.session,
                generator: deps.generator,
                analyzer: deps.analyzer,
                store: deps.store,
                session_key: deps.session_key,
                messages: message_tx,
                events,
                next_op_id: 1,
                active: None,
                next_discovery_id: 1,
                discovery: None,
            },
            inputs,
            messages,
        };
        (runtime, RuntimeHandle { inputs: input_tx })
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    /// Connects, discovers tools and picks up a restored task.
    ///
    /// Both network calls are bounded by the client's timeouts, so a dead
    /// server delays startup but cannot stall it.
    pub async fn start(&mut self) {
        match self.host.session.connect().await {
            Ok(client_id) => self.host.notify(TaskEvent::notice(format!(
                "Connected to tool server (clientId {client_id})"
            ))),
            Err(error) => self
                .host
                .notify(TaskEvent::notice(format!("Tool server not connected: {error}"))),
        }
        let discovered = self.host.session.discover_tools().await;
        self.apply_discovery(false, discovered);
        self.orchestrator.recover(&mut self.host);
    }

    /// Runs until `/quit` or until every [`RuntimeHandle`] is dropped.
    pub async fn run(mut self) -> Task {
        self.start().await;

        loop {
            tokio::select! {
                biased;
                input = self.inputs.recv() => {
                    let Some(input) = input else {
                        break;
                    };
                    if self.handle_input(input) == Flow::Exit {
                        break;
                    }
                }
                Some(message) = self.messages.recv() => self.handle_message(message),
            }
        }

        self.host.shutdown();
        self.orchestrator.task().clone()
    }

    fn handle_input(&mut self, input: UserInput) -> Flow {
        let outcome = match input {
            UserInput::Command(SlashCommand::Quit) => return Flow::Exit,
            UserInput::Command(SlashCommand::Tools) => {
                self.host.spawn_discovery(true);
                Ok(())
            }
            UserInput::Goal(goal) => self.orchestrator.submit_goal(&mut self.host, &goal),
            UserInput::Command(command) => self.dispatch(command),
        };

        if let Err(error) = outcome {
            self.host.notify(TaskEvent::Notice(error.to_string()));
        }
        Flow::Continue
    }

    fn dispatch(&mut self, command: SlashCommand) -> Result<(), OrchestratorError> {
        let host = &mut self.host;
        let orchestrator = &mut self.orchestrator;
        match command {
            SlashCommand::Approve => {
                let id = pending_id(orchestrator)?;
                orchestrator.approve(host, &id)
            }
            SlashCommand::Edit(parameters) => {
                let id = pending_id(orchestrator)?;
                orchestrator.edit(host, &id, parameters)
            }
            SlashCommand::Reject => {
                let id = pending_id(orchestrator)?;
                orchestrator.reject(host, &id)
            }
            SlashCommand::Stop => orchestrator.stop(host),
            SlashCommand::Resume => orchestrator.resume(host),
            SlashCommand::Cancel => orchestrator.cancel(host),
            SlashCommand::Status => {
                let line = format!(
                    "{} | connection: {}",
                    orchestrator.status_line(),
                    host.session.status().as_str()
                );
                host.notify(TaskEvent::Notice(line));
                Ok(())
            }
            SlashCommand::Limit(limit) => {
                orchestrator.set_step_limit(limit);
                host.notify(TaskEvent::notice(format!("Step limit set to {limit}")));
                Ok(())
            }
            SlashCommand::Help => {
                host.notify(TaskEvent::notice(HELP_TEXT));
                Ok(())
            }
            SlashCommand::Usage(usage) => {
                host.notify(TaskEvent::notice(format!("Usage: {usage}")));
                Ok(())
            }
            SlashCommand::Unknown(command) => {
                host.notify(TaskEvent::notice(format!("Unknown command: {command}")));
                Ok(())
            }
            SlashCommand::Tools | SlashCommand::Quit => Ok(()),
        }
    }

    fn handle_message(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::Progress { op_id, content } => {
                self.orchestrator
                    .on_progress(&mut self.host, op_id, content);
            }
            RuntimeMessage::Completed(completion) => {
                self.host.finish(completion.op_id);
                self.orchestrator
                    .on_completion(&mut self.host, completion);
            }
            RuntimeMessage::SessionRenewed { client_id } => {
                self.host.notify(TaskEvent::notice(format!(
                    "Reconnected to tool server (clientId {client_id})"
                )));
                self.host.spawn_discovery(false);
            }
            RuntimeMessage::ToolsDiscovered {
                discovery_id,
                announce,
                discovered,
            } => {
                if self.host.finish_discovery(discovery_id) {
                    self.apply_discovery(announce, discovered);
                } else {
                    debug!(discovery_id, "stale tool discovery ignored");
                }
            }
        }
    }

    fn apply_discovery(
        &mut self,
        announce: bool,
        discovered: Result<Vec<ToolDescriptor>, SessionError>,
    ) {
        let tools = match discovered {
            Ok(tools) => tools,
            Err(error) => {
                let cached = self.orchestrator.tools().len();
                warn!(%error, cached, "continuing with cached tool catalog");
                self.host.notify(TaskEvent::notice(format!(
                    "Tool discovery failed ({error}); continuing in degraded mode \
                     with {cached} cached tool(s)"
                )));
                return;
            }
        };

        let message = if tools.is_empty() {
            "No tools available".to_string()
        } else if announce {
            format!("Available tools:\n{}", render_tool_catalog(&tools))
        } else {
            format!("{} tool(s) available", tools.len())
        };
        self.orchestrator.set_tools(tools);
        self.host.notify(TaskEvent::Notice(message));
    }
}

fn pending_id(orchestrator: &TaskOrchestrator) -> Result<String, OrchestratorError> {
    orchestrator
        .pending_command()
        .map(|command| command.id.clone())
        .ok_or(OrchestratorError::Approval(ApprovalError::NotAwaitingApproval {
            state: orchestrator.task().state,
        }))
}

/// [`HostOps`] implementation that runs operations as tokio tasks.
struct RuntimeHost<S: ToolSession> {
    session: Arc<S>,
    generator: Arc<dyn CommandGenerator>,
    analyzer: Arc<dyn ResultAnalyzer>,
    store: TaskStore,
    session_key: String,
    messages: UnboundedSender<RuntimeMessage>,
    events: UnboundedSender<TaskEvent>,
    next_op_id: OpId,
    active: Option<(OpId, JoinHandle<()>)>,
    next_discovery_id: u64,
    /// Runs beside the active operation; a newer discovery supersedes it.
    discovery: Option<(u64, JoinHandle<()>)>,
}

impl<S: ToolSession> RuntimeHost<S> {
    fn allocate_op(&mut self) -> OpId {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        op_id
    }

    fn spawn_op<F>(&mut self, op_id: OpId, operation: F) -> OpId
    where
        F: Future<Output = OpOutcome> + Send + 'static,
    {
        let messages = self.messages.clone();
        let handle = tokio::spawn(async move {
            let outcome = operation.await;
            let _ = messages.send(RuntimeMessage::Completed(OpCompletion::new(op_id, outcome)));
        });
        if let Some((previous, _)) = self.active.replace((op_id, handle)) {
            debug!(previous, op_id, "operation handle replaced");
        }
        op_id
    }

    fn finish(&mut self, op_id: OpId) {
        if self.active.as_ref().is_some_and(|(active, _)| *active == op_id) {
            self.active = None;
        }
    }

    fn spawn_discovery(&mut self, announce: bool) {
        let discovery_id = self.next_discovery_id;
        self.next_discovery_id += 1;
        let session = Arc::clone(&self.session);
        let messages = self.messages.clone();
        let handle = tokio::spawn(async move {
            let discovered = session.discover_tools().await;
            let _ = messages.send(RuntimeMessage::ToolsDiscovered {
                discovery_id,
                announce,
                discovered,
            });
        });
        if let Some((previous, handle)) = self.discovery.replace((discovery_id, handle)) {
            debug!(previous, discovery_id, "tool discovery superseded");
            handle.abort();
        }
    }

    fn finish_discovery(&mut self, discovery_id: u64) -> bool {
        if self
            .discovery
            .as_ref()
            .is_some_and(|(current, _)| *current == discovery_id)
        {
            self.discovery = None;
            return true;
        }
        false
    }

    fn shutdown(&mut self) {
        if let Some((op_id, handle)) = self.active.take() {
            debug!(op_id, "aborting in-flight operation on shutdown");
            handle.abort();
        }
        if let Some((discovery_id, handle)) = self.discovery.take() {
            debug!(discovery_id, "aborting tool discovery on shutdown");
            handle.abort();
        }
        self.session.disconnect();
    }
}

impl<S: ToolSession> HostOps for RuntimeHost<S> {
    fn start_generation(&mut self, request: GenerationRequest) -> Result<OpId, String> {
        let op_id = self.allocate_op();
        let generator = Arc::clone(&self.generator);
        Ok(self.spawn_op(op_id, async move {
            OpOutcome::Generated(generator.generate(request).await)
        }))
    }

    fn start_execution(
        &mut self,
        command: ApprovedCommand,
        reconnect_first: bool,
    ) -> Result<OpId, String> {
        let op_id = self.allocate_op();
        let session = Arc::clone(&self.session);
        let progress_tx = self.messages.clone();
        Ok(self.spawn_op(op_id, async move {
            if reconnect_first {
                match session.reconnect().await {
                    Ok(client_id) => {
                        let _ = progress_tx.send(RuntimeMessage::SessionRenewed { client_id });
                    }
                    Err(error) => return OpOutcome::Executed(Err(error)),
                }
            }
            let progress: ProgressSink = Box::new(move |content: &Value| {
                let _ = progress_tx.send(RuntimeMessage::Progress {
                    op_id,
                    content: content.clone(),
                });
            });
            OpOutcome::Executed(session.execute(&command, progress).await)
        }))
    }

    fn start_analysis(&mut self, request: AnalysisRequest) -> Result<OpId, String> {
        let op_id = self.allocate_op();
        let analyzer = Arc::clone(&self.analyzer);
        Ok(self.spawn_op(op_id, async move {
            OpOutcome::Analyzed(analyzer.analyze(request).await)
        }))
    }

    fn cancel_op(&mut self, op_id: OpId) {
        if self.active.as_ref().is_some_and(|(active, _)| *active == op_id) {
            if let Some((_, handle)) = self.active.take() {
                debug!(op_id, "operation cancelled");
                handle.abort();
            }
        }
    }

    fn persist(&mut self, task: &Task) {
        if let Err(error) = self.store.save(&self.session_key, task) {
            warn!(%error, task_id = %task.id, "failed to save task");
            self.notify(TaskEvent::notice(format!("Failed to save task: {error}")));
        }
    }

    fn archive(&mut self, task: &Task) {
        match self.store.archive(&self.session_key, task) {
            Ok(path) => debug!(path = %path.display(), "task archived"),
            Err(error) => {
                warn!(%error, task_id = %task.id, "failed to archive task");
                self.notify(TaskEvent::notice(format!("Failed to archive task: {error}")));
            }
        }
    }

    fn notify(&mut self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}
