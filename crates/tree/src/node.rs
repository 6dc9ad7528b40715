use pb_core::Depth;
use pb_core::ID;
use pb_core::PhaseTag;
use pb_core::Reward;
use pb_core::Unique;
use pb_core::Value;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;

pub type NodeId = ID<ChallengeNode>;

/// One evaluator run against a node.
///
/// Carries the typed fields the scoring rules consume plus the evaluator's
/// full trail (problem statements, tests, solutions) stored verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRecord {
    pub success: bool,
    pub attempts: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_errored: usize,
    pub fixed_by_problem_fixer: bool,
    #[serde(default)]
    pub data_trail: serde_json::Value,
}

impl RunRecord {
    /// A zero-success record standing in for an evaluation that never
    /// completed; scoring treats it like a run where every test failed.
    pub fn failure(reason: &str) -> Self {
        Self {
            success: false,
            attempts: 1,
            data_trail: serde_json::json!({ "error": reason }),
            ..Self::default()
        }
    }
    /// Fraction of tests passed out of all tests run (0 when none ran).
    pub fn success_ratio(&self) -> Reward {
        let total = self.tests_passed + self.tests_failed + self.tests_errored;
        self.tests_passed as Reward / total.max(1) as Reward
    }
}

/// A point in the search space: a concept set at a difficulty, with the
/// statistics and run history accumulated by the phases that touched it.
///
/// Nodes never hold references to one another; `parents` and `children`
/// are IDs resolved through the owning [`Tree`](crate::Tree).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeNode {
    id: NodeId,
    pub difficulty: String,
    pub concepts: BTreeSet<String>,
    pub description: String,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    pub depth: Depth,
    pub phase: PhaseTag,
    visits: u32,
    pub successes: u32,
    pub failures: u32,
    pub score: Reward,
    pub value: Value,
    pub run_results: Vec<RunRecord>,
}

impl ChallengeNode {
    pub(crate) fn new(
        difficulty: String,
        concepts: BTreeSet<String>,
        description: String,
        parents: Vec<NodeId>,
        depth: Depth,
        phase: PhaseTag,
    ) -> Self {
        Self {
            id: NodeId::default(),
            difficulty,
            concepts,
            description,
            parents,
            children: Vec::new(),
            depth,
            phase,
            visits: 0,
            successes: 0,
            failures: 0,
            score: 0.0,
            value: 0.0,
            run_results: Vec::new(),
        }
    }
    pub fn visits(&self) -> u32 {
        self.visits
    }
    /// Append one evaluation outcome and refresh the raw score.
    /// Success/failure counters follow the record's own verdict.
    pub fn record(&mut self, record: RunRecord, score: Reward) {
        match record.success {
            true => self.successes += 1,
            false => self.failures += 1,
        }
        self.score = score;
        self.run_results.push(record);
    }
    /// Count one selection. The only way `visits` changes, so it can
    /// never decrease.
    pub fn visit(&mut self) {
        self.visits += 1;
    }
    /// Pull `value` toward `target` by `learning_rate`.
    pub fn nudge(&mut self, target: Value, learning_rate: Value) {
        self.value += learning_rate * (target - self.value);
    }
    /// Canonical display form: sorted concepts joined with "+".
    pub fn label(&self) -> String {
        self.concepts.iter().cloned().collect::<Vec<_>>().join("+")
    }
}

impl Unique for ChallengeNode {
    fn id(&self) -> NodeId {
        self.id
    }
}
