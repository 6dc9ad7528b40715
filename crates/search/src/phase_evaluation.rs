//! Comprehensive evaluation: revisit the trouble spots the discovery phase
//! surfaced and probe each with several problem variations at once.

use crate::context::PhaseContext;
use crate::phase_discovery::InverseValue;
use crate::registry::EvaluateNode;
use crate::registry::ExpandNode;
use crate::registry::Expanded;
use crate::registry::InitializePhase;
use crate::registry::Picked;
use crate::registry::Registry;
use crate::registry::SelectNode;
use crate::registry::StrategySet;
use crate::slots;
use crate::slots::DiscountedBackprop;
use async_trait::async_trait;
use pb_core::Unique;
use pb_core::Value;
use pb_evaluator::ChallengeRequest;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use rand::rngs::SmallRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "phase_3";

/// Variations requested per call when the config leaves it unset.
const DEFAULT_VARIATIONS: usize = 3;

pub fn register(registry: &mut Registry) {
    let mut set = StrategySet::new(3);
    set.select_node = Some(Arc::new(TargetedSelect));
    set.evaluate_node = Some(Arc::new(EnhancedEvaluate));
    set.calculate_node_value = Some(Arc::new(InverseValue));
    set.backpropagate_node_value = Some(Arc::new(DiscountedBackprop));
    set.expand_node = Some(Arc::new(VariationExpand));
    set.initialize_phase = Some(Arc::new(SweepInit));
    registry.register(NAME, set);
}

fn bar(ctx: &PhaseContext) -> Value {
    ctx.config
        .phase_params
        .node_selection_threshold
        .unwrap_or(ctx.config.phase_params.performance_threshold)
}

fn variations(ctx: &PhaseContext) -> usize {
    ctx.config
        .phase_params
        .variations_per_concept
        .unwrap_or(DEFAULT_VARIATIONS)
}

/// Log the size of the sweep frontier before the first iteration.
pub struct SweepInit;

#[async_trait]
impl InitializePhase for SweepInit {
    async fn initialize(&self, ctx: &PhaseContext) -> pb_core::Result<()> {
        let tree = ctx.tree.read().await;
        let eligible = tree
            .nodes()
            .filter(|n| n.phase == 2 && n.value >= bar(ctx))
            .count();
        log::info!("[{}] sweeping {} discovered nodes", ctx.name, eligible);
        Ok(())
    }
}

/// Deterministic pick over discovery-phase nodes that cleared the bar,
/// hottest first.
pub struct TargetedSelect;

#[async_trait]
impl SelectNode for TargetedSelect {
    async fn select(
        &self,
        ctx: &PhaseContext,
        taken: &[NodeId],
        _: &mut SmallRng,
    ) -> pb_core::Result<Picked> {
        let tree = ctx.tree.read().await;
        let candidates: Vec<(NodeId, Value)> = tree
            .sorted()
            .iter()
            .filter(|n| n.phase == 2 && n.value >= bar(ctx))
            .filter(|n| !taken.iter().any(|&t| tree.overlapping(t, n.id())))
            .map(|n| (n.id(), n.value))
            .collect();
        Ok(slots::greedy(&candidates)
            .map(Picked::Node)
            .unwrap_or(Picked::NoCandidate))
    }
}

/// One enhanced-mode call requesting every variation at once.
pub struct EnhancedEvaluate;

#[async_trait]
impl EvaluateNode for EnhancedEvaluate {
    async fn evaluate(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        token: &CancellationToken,
    ) -> pb_core::Result<RunRecord> {
        let (concepts, difficulty) = {
            let tree = ctx.tree.read().await;
            let node = tree.get(node)?;
            (
                node.concepts.iter().cloned().collect(),
                node.difficulty.clone(),
            )
        };
        let request = ChallengeRequest {
            environment: ctx.config.environment.name.clone(),
            concepts,
            difficulty,
            max_attempts: ctx.config.search_params.max_attempts,
            params: serde_json::json!({ "variations_per_concept": variations(ctx) }),
        };
        ctx.evaluator.run_challenge(request, token).await
    }
}

/// Fan the evaluated node out into same-challenge siblings, one per
/// variation returned by the enhanced call.
pub struct VariationExpand;

#[async_trait]
impl ExpandNode for VariationExpand {
    async fn expand(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        _: &mut SmallRng,
    ) -> pb_core::Result<Expanded> {
        let mut tree = ctx.tree.write().await;
        let this = tree.get(node)?.clone();
        let Some(last) = this.run_results.last().cloned() else {
            return Ok(Expanded::Skipped);
        };
        let trails = last
            .data_trail
            .get("variations")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut children = Vec::new();
        for i in 0..variations(ctx) {
            let child = tree.add_node(
                &[node],
                Some(this.concepts.clone()),
                Some(this.difficulty.clone()),
                3,
                Some(format!("variation {}", i + 1)),
            )?;
            let record = RunRecord {
                data_trail: trails.get(i).cloned().unwrap_or(serde_json::Value::Null),
                ..last.clone()
            };
            let score = this.score;
            tree.get_mut(child)?.record(record, score);
            children.push(child);
        }
        Ok(Expanded::Children(children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_config::EnvironmentConfig;
    use pb_config::PhaseConfig;
    use pb_evaluator::FixedEvaluator;
    use pb_tree::Tree;
    use rand::SeedableRng;
    use tokio::sync::RwLock;

    fn context(tree: Tree) -> PhaseContext {
        let mut config = PhaseConfig {
            phase_params: Default::default(),
            search_params: Default::default(),
            scoring_params: Default::default(),
            environment: EnvironmentConfig {
                name: "enhanced".into(),
            },
        };
        config.phase_params.node_selection_threshold = Some(1.0);
        config.phase_params.variations_per_concept = Some(2);
        PhaseContext::new(
            NAME,
            config,
            Arc::new(RwLock::new(tree)),
            Arc::new(FixedEvaluator::failing(5)),
            "snapshots",
        )
    }

    async fn with_discovered_node(ctx: &PhaseContext, value: f32) -> NodeId {
        let mut tree = ctx.tree.write().await;
        let root = tree.sorted()[0].id();
        let id = tree
            .add_node(&[root], None, Some("hard".into()), 2, None)
            .unwrap();
        tree.get_mut(id).unwrap().nudge(value, 1.0);
        id
    }

    fn seeded() -> Tree {
        let mut tree = Tree::new(
            vec!["A".into(), "B".into()],
            vec!["easy".into(), "hard".into()],
        );
        tree.initialize().unwrap();
        tree
    }

    #[tokio::test]
    async fn selection_is_restricted_to_hot_discovery_nodes() {
        let ctx = context(seeded());
        let mut rng = SmallRng::seed_from_u64(5);
        // nothing from the discovery phase yet
        let picked = TargetedSelect.select(&ctx, &[], &mut rng).await.unwrap();
        assert_eq!(picked, Picked::NoCandidate);
        let hot = with_discovered_node(&ctx, 2.0).await;
        with_discovered_node(&ctx, 0.5).await; // below the bar
        let picked = TargetedSelect.select(&ctx, &[], &mut rng).await.unwrap();
        assert_eq!(picked, Picked::Node(hot));
    }
    #[tokio::test]
    async fn selection_respects_taken_chains() {
        let ctx = context(seeded());
        let mut rng = SmallRng::seed_from_u64(5);
        let hot = with_discovered_node(&ctx, 2.0).await;
        let picked = TargetedSelect.select(&ctx, &[hot], &mut rng).await.unwrap();
        assert_eq!(picked, Picked::NoCandidate);
    }
    #[tokio::test]
    async fn enhanced_request_carries_variation_count() {
        let ctx = context(seeded());
        let node = with_discovered_node(&ctx, 2.0).await;
        let token = CancellationToken::new();
        let outcome = EnhancedEvaluate
            .evaluate(&ctx, node, &token)
            .await
            .unwrap();
        assert_eq!(outcome.data_trail["environment"], "enhanced");
    }
    #[tokio::test]
    async fn expansion_fans_out_variation_children() {
        let ctx = context(seeded());
        let node = with_discovered_node(&ctx, 2.0).await;
        {
            let mut tree = ctx.tree.write().await;
            tree.get_mut(node).unwrap().record(
                RunRecord {
                    success: false,
                    attempts: 2,
                    tests_failed: 5,
                    data_trail: serde_json::json!({
                        "variations": [{"problem": "p1"}, {"problem": "p2"}]
                    }),
                    ..RunRecord::default()
                },
                -1.0,
            );
        }
        let mut rng = SmallRng::seed_from_u64(5);
        let Expanded::Children(children) =
            VariationExpand.expand(&ctx, node, &mut rng).await.unwrap()
        else {
            panic!("expected children");
        };
        assert_eq!(children.len(), 2);
        let tree = ctx.tree.read().await;
        let parent = tree.get(node).unwrap();
        for (i, child) in children.iter().enumerate() {
            let child = tree.get(*child).unwrap();
            assert_eq!(child.phase, 3);
            assert_eq!(child.concepts, parent.concepts);
            assert_eq!(child.difficulty, parent.difficulty);
            assert_eq!(child.run_results.len(), 1);
            assert_eq!(
                child.run_results[0].data_trail["problem"],
                format!("p{}", i + 1)
            );
        }
    }
    #[tokio::test]
    async fn expansion_without_runs_skips() {
        let ctx = context(seeded());
        let node = with_discovered_node(&ctx, 2.0).await;
        let mut rng = SmallRng::seed_from_u64(5);
        let expanded = VariationExpand.expand(&ctx, node, &mut rng).await.unwrap();
        assert_eq!(expanded, Expanded::Skipped);
    }
}
