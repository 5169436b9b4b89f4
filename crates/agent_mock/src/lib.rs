//! Deterministic command generators and result analyzers.
//!
//! This crate contains no transport logic. The scripted collaborators drive
//! orchestrator tests; the rule-based pair backs local runs without a model.

mod rules;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agent_contract::{
    AnalysisOutcome, AnalysisRequest, CollaboratorError, Command, CommandGenerator,
    GenerationRequest, ResultAnalyzer,
};
use async_trait::async_trait;

pub use rules::{RuleBasedPlanner, SummaryAnalyzer, RULES_PLANNER_ID};

/// Stable identifier for the scripted collaborators.
pub const SCRIPTED_ID: &str = "scripted";

/// One scripted analyzer verdict. The result id is filled in per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStep {
    Complete(String),
    FollowUp {
        summary: String,
        commands: Vec<Command>,
    },
    Fail(String),
}

impl AnalysisStep {
    pub fn complete(summary: impl Into<String>) -> Self {
        Self::Complete(summary.into())
    }

    pub fn follow_up(summary: impl Into<String>, commands: Vec<Command>) -> Self {
        Self::FollowUp {
            summary: summary.into(),
            commands,
        }
    }
}

/// Generator that replays a fixed queue of responses.
///
/// Once the queue is empty every call fails with a generation error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<Vec<Command>, CollaboratorError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(responses: Vec<Result<Vec<Command>, CollaboratorError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Every response proposes exactly one command.
    #[must_use]
    pub fn single_commands(commands: Vec<Command>) -> Self {
        Self::new(commands.into_iter().map(|command| Ok(vec![command])).collect())
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

#[async_trait]
impl CommandGenerator for ScriptedGenerator {
    fn id(&self) -> &str {
        SCRIPTED_ID
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<Vec<Command>, CollaboratorError> {
        lock_unpoisoned(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock_unpoisoned(&self.responses)
            .pop_front()
            .unwrap_or_else(|| {
                Err(CollaboratorError::Generation(
                    "scripted generator has no responses left".to_string(),
                ))
            })
    }
}

/// Analyzer that replays a fixed queue of verdicts.
#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    steps: Mutex<VecDeque<AnalysisStep>>,
    requests: Mutex<Vec<AnalysisRequest>>,
    delay: Option<Duration>,
}

impl ScriptedAnalyzer {
    #[must_use]
    pub fn new(steps: Vec<AnalysisStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

#[async_trait]
impl ResultAnalyzer for ScriptedAnalyzer {
    fn id(&self) -> &str {
        SCRIPTED_ID
    }

    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisOutcome, CollaboratorError> {
        let result_id = request.result.id.clone();
        lock_unpoisoned(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = lock_unpoisoned(&self.steps).pop_front();
        match step {
            Some(AnalysisStep::Complete(summary)) => {
                Ok(AnalysisOutcome::complete(result_id, summary))
            }
            Some(AnalysisStep::FollowUp { summary, commands }) => {
                Ok(AnalysisOutcome::continue_with(result_id, summary, commands))
            }
            Some(AnalysisStep::Fail(message)) => Err(CollaboratorError::Analysis(message)),
            None => Err(CollaboratorError::Analysis(
                "scripted analyzer has no steps left".to_string(),
            )),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use agent_contract::{
        AnalysisRequest, CollaboratorError, Command, CommandGenerator, CommandResult,
        GenerationRequest, ResultAnalyzer,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{AnalysisStep, ScriptedAnalyzer, ScriptedGenerator};

    fn generation_request(goal: &str) -> GenerationRequest {
        GenerationRequest {
            goal: goal.to_string(),
            history: Vec::new(),
            rejected: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scripted_generator_replays_then_fails() {
        let command = Command::new("listFiles", json!({"path": "/tmp"}), "");
        let generator = ScriptedGenerator::single_commands(vec![command.clone()]);

        let first = generator
            .generate(generation_request("list"))
            .await
            .expect("scripted response");
        assert_eq!(first, vec![command]);

        let error = generator
            .generate(generation_request("list"))
            .await
            .expect_err("exhausted");
        assert!(matches!(error, CollaboratorError::Generation(_)));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_analyzer_binds_outcome_to_the_result() {
        let command = Command::new("listFiles", json!({"path": "/tmp"}), "");
        let follow_up = Command::new("readFile", json!({"path": "/tmp/a.txt"}), "");
        let analyzer = ScriptedAnalyzer::new(vec![
            AnalysisStep::follow_up("read it next", vec![follow_up.clone()]),
            AnalysisStep::complete("done"),
        ]);
        let result = CommandResult::success(&command.id, json!({"files": ["a.txt"]}));

        let outcome = analyzer
            .analyze(AnalysisRequest {
                goal: "inspect tmp".to_string(),
                command: command.clone(),
                result: result.clone(),
            })
            .await
            .expect("outcome");

        assert_eq!(outcome.result_id, result.id);
        assert!(!outcome.is_task_complete);
        assert_eq!(outcome.follow_up_commands, vec![follow_up]);
        assert_eq!(analyzer.requests()[0].goal, "inspect tmp");
    }
}
