use crate::context::PhaseContext;
use crate::registry::Expanded;
use crate::registry::Picked;
use crate::registry::Registry;
use crate::registry::Strategies;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use pb_core::SearchError;
use pb_core::Value;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a phase run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Ran to convergence or the iteration cap.
    Completed { converged: bool },
    /// The cancellation token fired and the loop drained.
    Cancelled,
    /// The wall-clock budget expired.
    TimedOut,
}

/// What a finished phase hands back to the task runner.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub outcome: PhaseOutcome,
    pub iterations: usize,
    pub snapshot: Option<PathBuf>,
}

/// Runs one phase to convergence, cap, cancellation, or timeout.
///
/// Owns the iteration loop: ancestor-disjoint batch selection, concurrent
/// evaluation, serialised scoring and backpropagation, expansion, the
/// convergence check, and per-iteration snapshots. The strategies resolved
/// at construction decide everything domain-specific.
pub struct PhaseEngine {
    ctx: PhaseContext,
    strategies: Strategies,
    rng: SmallRng,
}

impl PhaseEngine {
    /// Resolve the phase's strategies once; a missing slot is fatal here.
    pub fn new(registry: &Registry, ctx: PhaseContext) -> pb_core::Result<Self> {
        let strategies = registry.resolve(&ctx.name)?;
        Ok(Self {
            ctx,
            strategies,
            rng: SmallRng::from_os_rng(),
        })
    }
    /// Same, with a fixed seed for reproducible runs.
    pub fn seeded(registry: &Registry, ctx: PhaseContext, seed: u64) -> pb_core::Result<Self> {
        let mut engine = Self::new(registry, ctx)?;
        engine.rng = SmallRng::seed_from_u64(seed);
        Ok(engine)
    }

    /// Drive the phase loop until it finishes one way or another.
    pub async fn run(&mut self, token: &CancellationToken) -> pb_core::Result<PhaseReport> {
        if let Some(init) = self.strategies.initialize_phase.clone() {
            init.initialize(&self.ctx).await?;
        }
        let params = self.ctx.config.phase_params.clone();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(params.timeout_secs);
        let mut previous = self.ctx.tree.read().await.values();
        let mut stable = 0usize;
        let mut snapshot = None;
        let mut iteration = 0usize;
        let mut outcome = PhaseOutcome::Completed { converged: false };
        while iteration < params.max_iterations {
            if token.is_cancelled() {
                outcome = PhaseOutcome::Cancelled;
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                outcome = PhaseOutcome::TimedOut;
                break;
            }
            let picked = self.select_batch(token).await?;
            let evaluated = self.evaluate_batch(&picked, token).await?;
            if token.is_cancelled() {
                // in-flight units already drained above
                snapshot = Some(self.snapshot(iteration).await?);
                outcome = PhaseOutcome::Cancelled;
                break;
            }
            self.expand_batch(&evaluated).await;
            let current = self.ctx.tree.read().await.values();
            let delta = max_delta(&previous, &current);
            previous = current;
            stable = match delta <= params.value_delta_threshold {
                true => stable + 1,
                false => 0,
            };
            snapshot = Some(self.snapshot(iteration).await?);
            iteration += 1;
            log::debug!(
                "[{}] iteration {} evaluated {} delta {:.4} stable {}",
                self.ctx.name,
                iteration,
                evaluated.len(),
                delta,
                stable
            );
            if stable >= params.convergence_checks {
                outcome = PhaseOutcome::Completed { converged: true };
                break;
            }
        }
        if !matches!(outcome, PhaseOutcome::Completed { .. }) && snapshot.is_none() {
            snapshot = Some(self.snapshot(iteration).await?);
        }
        log::info!(
            "[{}] finished after {} iterations: {:?}",
            self.ctx.name,
            iteration,
            outcome
        );
        Ok(PhaseReport {
            outcome,
            iterations: iteration,
            snapshot,
        })
    }

    /// Pick up to `num_nodes_per_iteration` nodes with pairwise disjoint
    /// ancestor chains. The selector sees what is already taken; overlaps
    /// that slip through are rejected here, bounded so a stubborn selector
    /// cannot stall the loop.
    async fn select_batch(&mut self, token: &CancellationToken) -> pb_core::Result<Vec<NodeId>> {
        let want = self.ctx.config.phase_params.num_nodes_per_iteration;
        let mut picked: Vec<NodeId> = Vec::new();
        let mut rejections = 0;
        while picked.len() < want && rejections < want * 8 {
            if token.is_cancelled() {
                break;
            }
            match self
                .strategies
                .select_node
                .select(&self.ctx, &picked, &mut self.rng)
                .await?
            {
                Picked::NoCandidate => break,
                Picked::Node(id) => {
                    let tree = self.ctx.tree.read().await;
                    match picked.iter().any(|&p| tree.overlapping(p, id)) {
                        true => rejections += 1,
                        false => picked.push(id),
                    }
                }
            }
        }
        Ok(picked)
    }

    /// Launch one concurrent unit per pick and fold results back into the
    /// tree in completion order. A unit that failed permanently still
    /// contributes a zero-success record; a cancelled unit contributes
    /// nothing.
    async fn evaluate_batch(
        &self,
        picked: &[NodeId],
        token: &CancellationToken,
    ) -> pb_core::Result<Vec<NodeId>> {
        let mut units = FuturesUnordered::new();
        for &id in picked {
            let strategy = self.strategies.evaluate_node.clone();
            let ctx = &self.ctx;
            units.push(async move { (id, strategy.evaluate(ctx, id, token).await) });
        }
        let mut evaluated = Vec::new();
        while let Some((id, result)) = units.next().await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(SearchError::Cancelled) => continue,
                Err(e) => {
                    log::warn!("[{}] evaluation of {} failed: {}", self.ctx.name, id, e);
                    RunRecord::failure(&e.to_string())
                }
            };
            self.apply(id, outcome).await?;
            evaluated.push(id);
        }
        Ok(evaluated)
    }

    /// Score, record, and backpropagate one outcome under the write lock.
    async fn apply(&self, id: NodeId, outcome: RunRecord) -> pb_core::Result<()> {
        let mut tree = self.ctx.tree.write().await;
        let index = tree.difficulty_index(&tree.get(id)?.difficulty)?;
        let reward = self
            .strategies
            .calculate_node_value
            .calculate(&self.ctx, index, &outcome);
        tree.get_mut(id)?.record(outcome, reward);
        self.strategies.backpropagate_node_value.backpropagate(
            &mut tree,
            id,
            reward,
            &self.ctx.config.search_params,
        )
    }

    /// Expansion failures never stop the phase: invariant violations are
    /// rolled back by the tree and logged here.
    async fn expand_batch(&mut self, evaluated: &[NodeId]) {
        for &id in evaluated {
            match self
                .strategies
                .expand_node
                .expand(&self.ctx, id, &mut self.rng)
                .await
            {
                Ok(Expanded::Children(children)) => {
                    log::debug!("[{}] {} grew {} children", self.ctx.name, id, children.len())
                }
                Ok(Expanded::Skipped) => {}
                Err(SearchError::InvariantViolation(e)) => {
                    log::warn!("[{}] expansion of {} rolled back: {}", self.ctx.name, id, e)
                }
                Err(e) => log::warn!("[{}] expansion of {} failed: {}", self.ctx.name, id, e),
            }
        }
    }

    async fn snapshot(&self, iteration: usize) -> pb_core::Result<PathBuf> {
        self.ctx
            .tree
            .read()
            .await
            .snapshot(&self.ctx.snapshot_dir, self.strategies.tag, iteration)
    }
}

/// Largest absolute change in value between two value maps.
fn max_delta(before: &HashMap<NodeId, Value>, after: &HashMap<NodeId, Value>) -> Value {
    after
        .iter()
        .map(|(id, v)| (v - before.get(id).copied().unwrap_or(0.0)).abs())
        .fold(0.0, Value::max)
}
