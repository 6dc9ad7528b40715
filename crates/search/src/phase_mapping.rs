//! Capability mapping: chart what the model can do across the concept
//! space, pushing outward wherever it keeps succeeding.

use crate::context::PhaseContext;
use crate::registry::ExpandNode;
use crate::registry::Expanded;
use crate::registry::Registry;
use crate::registry::StrategySet;
use crate::slots;
use crate::slots::DiscountedBackprop;
use crate::slots::EpsilonGreedySelect;
use crate::slots::StandardEvaluate;
use async_trait::async_trait;
use pb_core::Reward;
use pb_core::Unique;
use pb_core::Value;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use rand::rngs::SmallRng;
use std::sync::Arc;

pub const NAME: &str = "phase_1";

pub fn register(registry: &mut Registry) {
    let mut set = StrategySet::new(1);
    set.select_node = Some(Arc::new(EpsilonGreedySelect));
    set.evaluate_node = Some(Arc::new(StandardEvaluate));
    set.calculate_node_value = Some(Arc::new(PerformanceValue));
    set.backpropagate_node_value = Some(Arc::new(DiscountedBackprop));
    set.expand_node = Some(Arc::new(MappingExpand));
    registry.register(NAME, set);
}

/// The raw scoring rule scaled by difficulty.
pub struct PerformanceValue;

impl crate::registry::CalculateNodeValue for PerformanceValue {
    fn calculate(&self, ctx: &PhaseContext, difficulty_index: usize, outcome: &RunRecord) -> Reward {
        pb_tree::performance_score(
            outcome,
            &ctx.config.scoring_params,
            pb_tree::difficulty_multiplier(difficulty_index),
        )
    }
}

/// Grow below nodes the model has mastered: combine concepts with a
/// same-depth partner when one exists, otherwise ascend the difficulty
/// ladder in place.
pub struct MappingExpand;

#[async_trait]
impl ExpandNode for MappingExpand {
    async fn expand(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        rng: &mut SmallRng,
    ) -> pb_core::Result<Expanded> {
        let mut tree = ctx.tree.write().await;
        let this = tree.get(node)?.clone();
        if this.value < ctx.config.phase_params.performance_threshold
            || this.depth >= ctx.config.phase_params.max_depth
        {
            return Ok(Expanded::Skipped);
        }
        let partners: Vec<(NodeId, Value)> = tree
            .sorted()
            .iter()
            .filter(|n| n.depth == this.depth && n.id() != node)
            .filter(|n| !n.concepts.is_subset(&this.concepts))
            .map(|n| (n.id(), n.value))
            .collect();
        let child = match slots::softmax(&partners, rng) {
            Some(partner) => tree.add_node(&[node, partner], None, None, 1, None)?,
            None => {
                let next = tree.ascend(&this.difficulty)?.to_string();
                tree.add_node(&[node], Some(this.concepts.clone()), Some(next), 1, None)?
            }
        };
        Ok(Expanded::Children(vec![child]))
    }
}
