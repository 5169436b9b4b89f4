#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use agent_contract::{
    AnalysisRequest, Command, CommandResult, GenerationRequest, Task, ToolDescriptor,
};
use async_trait::async_trait;
use mcp_client::ConnectionStatus;
use serde_json::json;
use task_agent::approval::ApprovedCommand;
use task_agent::events::TaskEvent;
use task_agent::orchestrator::{HostOps, OpId};
use task_agent::session::{ProgressSink, SessionError, ToolSession};

#[derive(Debug, Clone, PartialEq)]
pub enum Started {
    Generation(GenerationRequest),
    Execution {
        command: Command,
        reconnect_first: bool,
    },
    Analysis(AnalysisRequest),
}

/// Host that records every side effect and never runs anything itself.
#[derive(Debug)]
pub struct RecordingHost {
    next_op: OpId,
    pub started: Vec<(OpId, Started)>,
    pub cancelled: Vec<OpId>,
    pub persisted: usize,
    pub last_persisted: Option<Task>,
    pub archived: Vec<Task>,
    pub events: Vec<TaskEvent>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self {
            next_op: 100,
            started: Vec::new(),
            cancelled: Vec::new(),
            persisted: 0,
            last_persisted: None,
            archived: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl RecordingHost {
    pub fn last_started(&self) -> (OpId, Started) {
        match self.started.last() {
            Some(started) => started.clone(),
            None => panic!("no operation was started"),
        }
    }

    pub fn last_op(&self) -> OpId {
        self.last_started().0
    }

    pub fn notices(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TaskEvent::Notice(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn allocate(&mut self, started: Started) -> OpId {
        self.next_op += 1;
        self.started.push((self.next_op, started));
        self.next_op
    }
}

impl HostOps for RecordingHost {
    fn start_generation(&mut self, request: GenerationRequest) -> Result<OpId, String> {
        Ok(self.allocate(Started::Generation(request)))
    }

    fn start_execution(
        &mut self,
        command: ApprovedCommand,
        reconnect_first: bool,
    ) -> Result<OpId, String> {
        Ok(self.allocate(Started::Execution {
            command: command.command().clone(),
            reconnect_first,
        }))
    }

    fn start_analysis(&mut self, request: AnalysisRequest) -> Result<OpId, String> {
        Ok(self.allocate(Started::Analysis(request)))
    }

    fn cancel_op(&mut self, op_id: OpId) {
        self.cancelled.push(op_id);
    }

    fn persist(&mut self, task: &Task) {
        self.persisted += 1;
        self.last_persisted = Some(task.clone());
    }

    fn archive(&mut self, task: &Task) {
        self.archived.push(task.clone());
    }

    fn notify(&mut self, event: TaskEvent) {
        self.events.push(event);
    }
}

pub fn command(id: &str) -> Command {
    Command::with_id(id, "listFiles", json!({"path": "/tmp"}), "look around")
}

pub fn tool(name: &str) -> ToolDescriptor {
    ToolDescriptor::new(name, Some(format!("{name} tool")), json!({}))
}

/// Scripted execution outcome for [`FakeSession`].
#[derive(Debug, Clone)]
pub enum FakeExecution {
    Succeed,
    Lose,
}

/// Scripted discovery outcome for [`FakeSession`]. Unscripted calls succeed.
#[derive(Debug, Clone)]
pub enum FakeDiscovery {
    Succeed,
    Fail(String),
    /// Never returns.
    Stall,
}

/// In-memory tool session: echoes parameters back as the payload.
#[derive(Debug)]
pub struct FakeSession {
    tools: Vec<ToolDescriptor>,
    script: Mutex<VecDeque<FakeExecution>>,
    discovery_script: Mutex<VecDeque<FakeDiscovery>>,
    pub discoveries: AtomicUsize,
    pub connects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub executions: Mutex<Vec<Command>>,
    pub disconnected: AtomicUsize,
}

impl FakeSession {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            script: Mutex::new(VecDeque::new()),
            discovery_script: Mutex::new(VecDeque::new()),
            discoveries: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            executions: Mutex::new(Vec::new()),
            disconnected: AtomicUsize::new(0),
        }
    }

    pub fn with_script(self, script: Vec<FakeExecution>) -> Self {
        *lock_unpoisoned(&self.script) = script.into();
        self
    }

    pub fn with_discoveries(self, script: Vec<FakeDiscovery>) -> Self {
        *lock_unpoisoned(&self.discovery_script) = script.into();
        self
    }

    pub fn executed(&self) -> Vec<Command> {
        lock_unpoisoned(&self.executions).clone()
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn connect(&self) -> Result<String, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok("fake-client".to_string())
    }

    async fn reconnect(&self) -> Result<String, SessionError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok("fake-client-2".to_string())
    }

    async fn discover_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        let step = lock_unpoisoned(&self.discovery_script)
            .pop_front()
            .unwrap_or(FakeDiscovery::Succeed);
        match step {
            FakeDiscovery::Succeed => Ok(self.tools.clone()),
            FakeDiscovery::Fail(reason) => Err(SessionError::ToolDiscovery(reason)),
            FakeDiscovery::Stall => std::future::pending().await,
        }
    }

    async fn execute(
        &self,
        command: &ApprovedCommand,
        mut progress: ProgressSink,
    ) -> Result<CommandResult, SessionError> {
        let command = command.command().clone();
        lock_unpoisoned(&self.executions).push(command.clone());
        let step = lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or(FakeExecution::Succeed);
        match step {
            FakeExecution::Succeed => {
                progress(&json!({"status": "running"}));
                Ok(CommandResult::success(
                    &command.id,
                    json!({"echo": command.parameters}),
                ))
            }
            FakeExecution::Lose => Err(SessionError::Lost("stream closed".to_string())),
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    fn disconnect(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
