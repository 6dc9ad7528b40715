use crate::context::PhaseContext;
use crate::phase_discovery;
use crate::phase_evaluation;
use crate::phase_mapping;
use async_trait::async_trait;
use pb_config::SearchParams;
use pb_core::PhaseTag;
use pb_core::Reward;
use pb_core::SearchError;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use pb_tree::Tree;
use rand::rngs::SmallRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a selection slot: a node, or nothing left to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Picked {
    Node(NodeId),
    NoCandidate,
}

/// Outcome of an expansion slot: the children created, or a deliberate pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expanded {
    Children(Vec<NodeId>),
    Skipped,
}

/// Pick the next node to evaluate, avoiding the already-taken picks.
#[async_trait]
pub trait SelectNode: Send + Sync {
    async fn select(
        &self,
        ctx: &PhaseContext,
        taken: &[NodeId],
        rng: &mut SmallRng,
    ) -> pb_core::Result<Picked>;
}

/// Produce one evaluator outcome for a node.
#[async_trait]
pub trait EvaluateNode: Send + Sync {
    async fn evaluate(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        token: &CancellationToken,
    ) -> pb_core::Result<RunRecord>;
}

/// Map an evaluation outcome to a reward. Pure and non-suspending.
pub trait CalculateNodeValue: Send + Sync {
    fn calculate(&self, ctx: &PhaseContext, difficulty_index: usize, outcome: &RunRecord) -> Reward;
}

/// Propagate a reward up the ancestor chain. Pure and non-suspending;
/// runs under the tree write lock.
pub trait BackpropagateNodeValue: Send + Sync {
    fn backpropagate(
        &self,
        tree: &mut Tree,
        node: NodeId,
        reward: Reward,
        params: &SearchParams,
    ) -> pb_core::Result<()>;
}

/// Grow the frontier below an evaluated node.
#[async_trait]
pub trait ExpandNode: Send + Sync {
    async fn expand(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        rng: &mut SmallRng,
    ) -> pb_core::Result<Expanded>;
}

/// Optional per-phase warm-up before the first iteration.
#[async_trait]
pub trait InitializePhase: Send + Sync {
    async fn initialize(&self, ctx: &PhaseContext) -> pb_core::Result<()>;
}

/// A phase's slot table as registered; slots may still be missing here.
pub struct StrategySet {
    pub tag: PhaseTag,
    pub select_node: Option<Arc<dyn SelectNode>>,
    pub evaluate_node: Option<Arc<dyn EvaluateNode>>,
    pub calculate_node_value: Option<Arc<dyn CalculateNodeValue>>,
    pub backpropagate_node_value: Option<Arc<dyn BackpropagateNodeValue>>,
    pub expand_node: Option<Arc<dyn ExpandNode>>,
    pub initialize_phase: Option<Arc<dyn InitializePhase>>,
}

impl StrategySet {
    pub fn new(tag: PhaseTag) -> Self {
        Self {
            tag,
            select_node: None,
            evaluate_node: None,
            calculate_node_value: None,
            backpropagate_node_value: None,
            expand_node: None,
            initialize_phase: None,
        }
    }
}

/// A fully resolved strategy set; every mandatory slot present.
#[derive(Clone)]
pub struct Strategies {
    pub tag: PhaseTag,
    pub select_node: Arc<dyn SelectNode>,
    pub evaluate_node: Arc<dyn EvaluateNode>,
    pub calculate_node_value: Arc<dyn CalculateNodeValue>,
    pub backpropagate_node_value: Arc<dyn BackpropagateNodeValue>,
    pub expand_node: Arc<dyn ExpandNode>,
    pub initialize_phase: Option<Arc<dyn InitializePhase>>,
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies").field("tag", &self.tag).finish_non_exhaustive()
    }
}

/// Table of phase name → strategy set, populated at process start by the
/// `phase_*` modules' registration entries.
#[derive(Default)]
pub struct Registry {
    phases: HashMap<String, StrategySet>,
}

impl Registry {
    /// The built-in strategy sets.
    pub fn discover() -> Self {
        let mut registry = Self::default();
        phase_mapping::register(&mut registry);
        phase_discovery::register(&mut registry);
        phase_evaluation::register(&mut registry);
        log::info!("[registry] discovered phases: {:?}", registry.names());
        registry
    }
    pub fn register(&mut self, name: impl Into<String>, set: StrategySet) {
        self.phases.insert(name.into(), set);
    }
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.phases.keys().map(String::as_str).collect();
        names.sort();
        names
    }
    /// Resolve a phase to its full slot table, once, at phase construction.
    pub fn resolve(&self, phase: &str) -> pb_core::Result<Strategies> {
        let set = self
            .phases
            .get(phase)
            .ok_or_else(|| SearchError::NotFound(format!("phase '{}'", phase)))?;
        let missing = |slot: &'static str| SearchError::StrategyUnresolved {
            phase: phase.to_string(),
            slot,
        };
        Ok(Strategies {
            tag: set.tag,
            select_node: set.select_node.clone().ok_or_else(|| missing("select_node"))?,
            evaluate_node: set
                .evaluate_node
                .clone()
                .ok_or_else(|| missing("evaluate_node"))?,
            calculate_node_value: set
                .calculate_node_value
                .clone()
                .ok_or_else(|| missing("calculate_node_value"))?,
            backpropagate_node_value: set
                .backpropagate_node_value
                .clone()
                .ok_or_else(|| missing("backpropagate_node_value"))?,
            expand_node: set.expand_node.clone().ok_or_else(|| missing("expand_node"))?,
            initialize_phase: set.initialize_phase.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_registers_builtin_phases() {
        let registry = Registry::discover();
        assert_eq!(registry.names(), vec!["phase_1", "phase_2", "phase_3"]);
    }
    #[test]
    fn builtin_phases_resolve() {
        let registry = Registry::discover();
        for (name, tag) in [("phase_1", 1), ("phase_2", 2), ("phase_3", 3)] {
            let strategies = registry.resolve(name).unwrap();
            assert_eq!(strategies.tag, tag);
        }
    }
    #[test]
    fn missing_slot_is_unresolved() {
        let mut registry = Registry::default();
        registry.register("phase_hollow", StrategySet::new(9));
        let err = registry.resolve("phase_hollow").unwrap_err();
        assert!(matches!(
            err,
            SearchError::StrategyUnresolved { slot: "select_node", .. }
        ));
    }
    #[test]
    fn unknown_phase_is_not_found() {
        let registry = Registry::discover();
        assert!(matches!(
            registry.resolve("phase_42"),
            Err(SearchError::NotFound(_))
        ));
    }
}
