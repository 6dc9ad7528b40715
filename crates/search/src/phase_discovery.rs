//! Challenge discovery: seek out where the model struggles. Rewards are
//! inverted so hard spots accumulate value and attract the search.

use crate::context::PhaseContext;
use crate::registry::CalculateNodeValue;
use crate::registry::ExpandNode;
use crate::registry::Expanded;
use crate::registry::Registry;
use crate::registry::StrategySet;
use crate::slots::DiscountedBackprop;
use crate::slots::EpsilonGreedySelect;
use crate::slots::StandardEvaluate;
use async_trait::async_trait;
use pb_core::Reward;
use pb_core::Unique;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use std::sync::Arc;

pub const NAME: &str = "phase_2";

pub fn register(registry: &mut Registry) {
    let mut set = StrategySet::new(2);
    set.select_node = Some(Arc::new(EpsilonGreedySelect));
    set.evaluate_node = Some(Arc::new(StandardEvaluate));
    set.calculate_node_value = Some(Arc::new(InverseValue));
    set.backpropagate_node_value = Some(Arc::new(DiscountedBackprop));
    set.expand_node = Some(Arc::new(DiscoveryExpand));
    registry.register(NAME, set);
}

/// The inverse scoring rule: struggle pays. The attempt and fixer weights
/// reuse the configured penalty magnitudes.
pub struct InverseValue;

impl CalculateNodeValue for InverseValue {
    fn calculate(&self, ctx: &PhaseContext, _: usize, outcome: &RunRecord) -> Reward {
        let scoring = &ctx.config.scoring_params;
        let fixer = match outcome.fixed_by_problem_fixer {
            true => scoring.fixed_by_problem_fixer_penalty,
            false => 0.0,
        };
        (1.0 - outcome.success_ratio())
            + outcome.attempts.saturating_sub(1) as Reward * scoring.penalty_per_attempt
            + fixer
    }
}

/// Past the challenge bar, push the same concepts up the difficulty
/// ladder; below it, fold in a concept the node has not seen yet.
pub struct DiscoveryExpand;

#[async_trait]
impl ExpandNode for DiscoveryExpand {
    async fn expand(
        &self,
        ctx: &PhaseContext,
        node: NodeId,
        rng: &mut SmallRng,
    ) -> pb_core::Result<Expanded> {
        let params = &ctx.config.phase_params;
        let bar = params
            .challenge_threshold
            .unwrap_or(params.performance_threshold);
        let mut tree = ctx.tree.write().await;
        let this = tree.get(node)?.clone();
        if this.depth >= params.max_depth {
            return Ok(Expanded::Skipped);
        }
        let child = if this.value >= bar {
            let next = tree.ascend(&this.difficulty)?.to_string();
            tree.add_node(&[node], Some(this.concepts.clone()), Some(next), 2, None)?
        } else {
            let unseen: Vec<&String> = tree
                .concepts()
                .iter()
                .filter(|c| !this.concepts.contains(*c))
                .collect();
            let Some(fresh) = unseen.choose(rng).copied() else {
                return Ok(Expanded::Skipped);
            };
            let concept = fresh.clone();
            let mut concepts = this.concepts.clone();
            concepts.insert(concept.clone());
            // the concept's root becomes a co-parent when it still exists
            let co_parent = tree
                .sorted()
                .iter()
                .find(|n| n.depth == 0 && n.concepts.len() == 1 && n.concepts.contains(&concept))
                .map(|n| n.id());
            let parents: Vec<NodeId> = std::iter::once(node).chain(co_parent).collect();
            tree.add_node(
                &parents,
                Some(concepts),
                Some(this.difficulty.clone()),
                2,
                None,
            )?
        };
        Ok(Expanded::Children(vec![child]))
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
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn context(tree: Tree, challenge_threshold: Option<f32>) -> PhaseContext {
        let mut config = PhaseConfig {
            phase_params: Default::default(),
            search_params: Default::default(),
            scoring_params: Default::default(),
            environment: EnvironmentConfig {
                name: "standard".into(),
            },
        };
        config.phase_params.challenge_threshold = challenge_threshold;
        PhaseContext::new(
            NAME,
            config,
            Arc::new(RwLock::new(tree)),
            Arc::new(FixedEvaluator::failing(10)),
            "snapshots",
        )
    }

    fn seeded() -> Tree {
        let mut tree = Tree::new(
            vec!["A".into(), "B".into(), "C".into()],
            vec!["easy".into(), "hard".into()],
        );
        tree.initialize().unwrap();
        tree
    }

    #[test]
    fn inverse_value_rewards_struggle() {
        let ctx = context(seeded(), None);
        let walkover = RunRecord {
            success: true,
            attempts: 1,
            tests_passed: 10,
            ..RunRecord::default()
        };
        let slog = RunRecord {
            success: false,
            attempts: 3,
            tests_passed: 2,
            tests_failed: 8,
            fixed_by_problem_fixer: true,
            ..RunRecord::default()
        };
        let easy = InverseValue.calculate(&ctx, 0, &walkover);
        let hard = InverseValue.calculate(&ctx, 0, &slog);
        assert_eq!(easy, 0.0);
        assert!(hard > easy);
        // (1 - 0.2) + 2*1.0 + 5.0
        assert!((hard - 7.8).abs() < 1e-5);
    }
    #[tokio::test]
    async fn past_the_bar_difficulty_ascends() {
        let ctx = context(seeded(), Some(0.5));
        let root = {
            let mut tree = ctx.tree.write().await;
            let root = tree.sorted()[0].id();
            tree.get_mut(root).unwrap().nudge(2.0, 1.0);
            root
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let Expanded::Children(children) = DiscoveryExpand.expand(&ctx, root, &mut rng).await.unwrap()
        else {
            panic!("expected a child");
        };
        let tree = ctx.tree.read().await;
        let child = tree.get(children[0]).unwrap();
        assert_eq!(child.difficulty, "hard");
        assert_eq!(child.concepts, tree.get(root).unwrap().concepts);
        assert_eq!(child.phase, 2);
    }
    #[tokio::test]
    async fn below_the_bar_a_new_concept_joins() {
        let ctx = context(seeded(), Some(0.5));
        let root = ctx.tree.read().await.sorted()[0].id();
        let mut rng = SmallRng::seed_from_u64(3);
        let Expanded::Children(children) = DiscoveryExpand.expand(&ctx, root, &mut rng).await.unwrap()
        else {
            panic!("expected a child");
        };
        let tree = ctx.tree.read().await;
        let child = tree.get(children[0]).unwrap();
        assert_eq!(child.concepts.len(), 2);
        assert_eq!(child.difficulty, "easy");
        assert!(child.parents.len() >= 1);
    }
    #[tokio::test]
    async fn saturated_concepts_skip() {
        let mut tree = Tree::new(vec!["A".into()], vec!["easy".into()]);
        tree.initialize().unwrap();
        let ctx = context(tree, Some(10.0));
        let root = ctx.tree.read().await.sorted()[0].id();
        let mut rng = SmallRng::seed_from_u64(3);
        let expanded = DiscoveryExpand.expand(&ctx, root, &mut rng).await.unwrap();
        assert_eq!(expanded, Expanded::Skipped);
    }
}
