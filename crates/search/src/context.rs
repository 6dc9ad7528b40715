use pb_config::PhaseConfig;
use pb_evaluator::Evaluate;
use pb_tree::Tree;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a strategy slot may touch during a phase.
///
/// The tree is the only shared mutable state; strategies take the read side
/// for inspection and the write side for short, non-suspending mutations.
#[derive(Clone)]
pub struct PhaseContext {
    /// Configured phase name, e.g. `phase_1`.
    pub name: String,
    pub config: PhaseConfig,
    pub tree: Arc<RwLock<Tree>>,
    pub evaluator: Arc<dyn Evaluate>,
    pub snapshot_dir: PathBuf,
}

impl PhaseContext {
    pub fn new(
        name: impl Into<String>,
        config: PhaseConfig,
        tree: Arc<RwLock<Tree>>,
        evaluator: Arc<dyn Evaluate>,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            tree,
            evaluator,
            snapshot_dir: snapshot_dir.into(),
        }
    }
}
