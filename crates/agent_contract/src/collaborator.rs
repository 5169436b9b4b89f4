use async_trait::async_trait;
use thiserror::Error;

use crate::command::{AnalysisOutcome, Command, CommandResult};
use crate::task::HistoryEntry;
use crate::tool::ToolDescriptor;

/// Failure surfaced by a command generator or result analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("command generation failed: {0}")]
    Generation(String),

    #[error("result analysis failed: {0}")]
    Analysis(String),
}

/// Context handed to the generator for one Generating step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub goal: String,
    pub history: Vec<HistoryEntry>,
    pub rejected: Vec<Command>,
    pub tools: Vec<ToolDescriptor>,
}

/// Context handed to the analyzer for one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub goal: String,
    pub command: Command,
    pub result: CommandResult,
}

/// Proposes candidate commands for a goal.
#[async_trait]
pub trait CommandGenerator: Send + Sync + 'static {
    /// Stable identifier used in logs and the CLI banner.
    fn id(&self) -> &str;

    /// Returns candidate commands, best first. The first is proposed, the rest
    /// are kept as alternatives.
    async fn generate(&self, request: GenerationRequest) -> Result<Vec<Command>, CollaboratorError>;
}

/// Interprets a command result and decides whether the task is complete.
#[async_trait]
pub trait ResultAnalyzer: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, CollaboratorError>;
}
