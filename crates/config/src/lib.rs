//! Typed configuration documents for the search core.
//!
//! Everything is loaded once at startup from a single YAML file and handed
//! out by value; nothing here is re-read at runtime.

use pb_core::Probability;
use pb_core::Reward;
use pb_core::SearchError;
use pb_core::Value;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub experiment: ExperimentConfig,
    pub phases: BTreeMap<String, PhaseConfig>,
    pub tree: TreeConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// One experiment: a named, ordered sequence of phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub phase_sequences: Vec<String>,
}

/// Per-phase knobs, split the way the engine consumes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(default)]
    pub phase_params: PhaseParams,
    #[serde(default)]
    pub search_params: SearchParams,
    #[serde(default)]
    pub scoring_params: ScoringParams,
    pub environment: EnvironmentConfig,
}

/// Loop control and selection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseParams {
    pub max_depth: usize,
    pub max_iterations: usize,
    pub performance_threshold: Value,
    pub value_delta_threshold: Value,
    pub convergence_checks: usize,
    pub exploration_probability: Probability,
    pub num_nodes_per_iteration: usize,
    /// Wall-clock budget for the whole phase, in seconds.
    pub timeout_secs: u64,
    /// Discovery-phase bar above which difficulty ascent is preferred.
    pub challenge_threshold: Option<Value>,
    /// Evaluation-phase bar a discovery node must clear to be selected.
    pub node_selection_threshold: Option<Value>,
    /// Variations requested per enhanced evaluation call.
    pub variations_per_concept: Option<usize>,
}

impl Default for PhaseParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_iterations: 100,
            performance_threshold: 0.4,
            value_delta_threshold: 0.05,
            convergence_checks: 5,
            exploration_probability: 0.2,
            num_nodes_per_iteration: 5,
            timeout_secs: pb_core::PHASE_TIMEOUT.as_secs(),
            challenge_threshold: None,
            node_selection_threshold: None,
            variations_per_concept: None,
        }
    }
}

/// Reward propagation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub max_attempts: usize,
    pub discount_factor: Value,
    pub learning_rate: Value,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            discount_factor: 0.9,
            learning_rate: 0.9,
        }
    }
}

/// Scoring-rule penalties and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub penalty_per_failure: Reward,
    pub penalty_per_error: Reward,
    pub penalty_per_attempt: Reward,
    pub fixed_by_problem_fixer_penalty: Reward,
    pub max_num_passed: usize,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            penalty_per_failure: 2.0,
            penalty_per_error: 1.5,
            penalty_per_attempt: 1.0,
            fixed_by_problem_fixer_penalty: 5.0,
            max_num_passed: 10,
        }
    }
}

/// Which evaluation mode the evaluator service should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
}

/// Seed concept set and difficulty ladder for the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub concepts: Vec<String>,
    pub difficulties: Vec<String>,
}

/// Process-level settings: bind address, snapshot sink, evaluator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub snapshot_dir: String,
    pub evaluator_url: String,
    /// Overall budget for one evaluation call, in seconds.
    pub evaluation_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            snapshot_dir: pb_core::SNAPSHOT_DIR.to_string(),
            evaluator_url: "http://127.0.0.1:8001".to_string(),
            evaluation_timeout_secs: pb_core::EVALUATION_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    /// Parse and validate a settings document from YAML text.
    pub fn from_yaml(yaml: &str) -> pb_core::Result<Self> {
        let settings: Settings =
            serde_yaml::from_str(yaml).map_err(|e| SearchError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
    /// Parse and validate a settings document from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> pb_core::Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        log::info!("[config] loaded {}", path.as_ref().display());
        Self::from_yaml(&yaml)
    }
    /// Resolve a phase name against the configured phase table.
    pub fn phase(&self, name: &str) -> pb_core::Result<&PhaseConfig> {
        self.phases
            .get(name)
            .ok_or_else(|| SearchError::Config(format!("phase '{}' is not configured", name)))
    }

    fn validate(&self) -> pb_core::Result<()> {
        if self.tree.concepts.is_empty() {
            return Err(SearchError::Config("tree.concepts must be non-empty".into()));
        }
        if self.tree.difficulties.is_empty() {
            return Err(SearchError::Config(
                "tree.difficulties must be non-empty".into(),
            ));
        }
        if self.experiment.phase_sequences.is_empty() {
            return Err(SearchError::Config(
                "experiment.phase_sequences must name at least one phase".into(),
            ));
        }
        for name in &self.experiment.phase_sequences {
            if !self.phases.contains_key(name) {
                return Err(SearchError::Config(format!(
                    "experiment names phase '{}' with no phase entry",
                    name
                )));
            }
        }
        Ok(())
    }
}
