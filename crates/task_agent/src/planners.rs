use std::sync::Arc;

use agent_contract::{CommandGenerator, ResultAnalyzer};
use agent_mock::{RuleBasedPlanner, SummaryAnalyzer, RULES_PLANNER_ID};

pub const DEFAULT_PLANNER_ID: &str = RULES_PLANNER_ID;
pub const PLANNER_ENV_VAR: &str = "TASK_AGENT_PLANNER";

/// Generator and analyzer pair backing one planner id.
pub struct Planner {
    pub generator: Arc<dyn CommandGenerator>,
    pub analyzer: Arc<dyn ResultAnalyzer>,
}

pub fn planner_from_env() -> Result<Planner, String> {
    let planner_id = std::env::var(PLANNER_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    planner_for_id(planner_id.as_deref().unwrap_or(DEFAULT_PLANNER_ID))
}

pub fn planner_for_id(planner_id: &str) -> Result<Planner, String> {
    match planner_id {
        DEFAULT_PLANNER_ID => Ok(Planner {
            generator: Arc::new(RuleBasedPlanner),
            analyzer: Arc::new(SummaryAnalyzer),
        }),
        unknown => Err(format!(
            "Unsupported planner '{unknown}'. Available planners: {DEFAULT_PLANNER_ID}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_for_id_supports_rules() {
        let planner = match planner_for_id("rules") {
            Ok(planner) => planner,
            Err(error) => panic!("rules planner should resolve: {error}"),
        };
        assert_eq!(planner.generator.id(), "rules");
    }

    #[test]
    fn planner_for_id_rejects_unknown_planner() {
        let error = match planner_for_id("gpt") {
            Ok(_) => panic!("unknown planners should fail"),
            Err(error) => error,
        };

        assert!(error.contains("Unsupported planner 'gpt'"));
    }
}
