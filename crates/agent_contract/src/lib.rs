//! Shared domain contract for the tool-server agent.
//!
//! This crate defines the task aggregate, its state transition table, the
//! command/result/analysis records that flow through one Cycle-of-Thought, and
//! the collaborator traits used to generate and analyze commands. It contains
//! no transport, persistence or scheduling logic.

mod clock;
mod collaborator;
mod command;
mod task;
mod tool;
mod tool_call;

pub use clock::now_rfc3339;
pub use collaborator::{
    AnalysisRequest, CollaboratorError, CommandGenerator, GenerationRequest, ResultAnalyzer,
};
pub use command::{AnalysisOutcome, Command, CommandId, CommandResult, CommandStatus};
pub use task::{HistoryEntry, StopReason, StoppedContext, Task, TaskError, TaskState};
pub use tool::{render_tool_catalog, ToolDescriptor};
pub use tool_call::{parse_tool_call, ParsedToolCall};
