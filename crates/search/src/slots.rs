use crate::context::PhaseContext;
use crate::registry::BackpropagateNodeValue;
use crate::registry::EvaluateNode;
use crate::registry::Picked;
use crate::registry::SelectNode;
use async_trait::async_trait;
use pb_config::SearchParams;
use pb_core::Reward;
use pb_core::Unique;
use pb_core::Value;
use pb_evaluator::ChallengeRequest;
use pb_tree::NodeId;
use pb_tree::RunRecord;
use pb_tree::Tree;
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use tokio_util::sync::CancellationToken;

// ----------------------------------------------------------------------------
// sampling helpers
// ----------------------------------------------------------------------------

/// Uniform draw over candidates.
pub(crate) fn uniform(candidates: &[(NodeId, Value)], rng: &mut SmallRng) -> Option<NodeId> {
    candidates.choose(rng).map(|(id, _)| *id)
}

/// Softmax-weighted draw over candidate values.
pub(crate) fn softmax(candidates: &[(NodeId, Value)], rng: &mut SmallRng) -> Option<NodeId> {
    let hottest = candidates
        .iter()
        .map(|(_, v)| *v)
        .fold(Value::NEG_INFINITY, Value::max);
    let weights: Vec<Value> = candidates.iter().map(|(_, v)| (v - hottest).exp()).collect();
    let total: Value = weights.iter().sum();
    let mut draw = rng.random::<Value>() * total;
    for ((id, _), weight) in candidates.iter().zip(weights.iter()) {
        draw -= weight;
        if draw <= 0.0 {
            return Some(*id);
        }
    }
    candidates.last().map(|(id, _)| *id)
}

/// Highest value wins; ties go to the lexicographically smallest ID.
pub(crate) fn greedy(candidates: &[(NodeId, Value)]) -> Option<NodeId> {
    candidates
        .iter()
        .max_by(|a, b| match a.1.total_cmp(&b.1) {
            std::cmp::Ordering::Equal => b.0.cmp(&a.0),
            ordering => ordering,
        })
        .map(|(id, _)| *id)
}

// ----------------------------------------------------------------------------
// slot implementations shared by the mapping and discovery phases
// ----------------------------------------------------------------------------

/// ε-greedy selection over every node shallower than the depth cap.
///
/// With probability `exploration_probability` the pick is uniform;
/// otherwise candidates are weighted by a softmax of their value. At
/// exploration zero the pick degenerates to the deterministic maximum so
/// repeated runs agree given fixed values.
pub struct EpsilonGreedySelect;

#[async_trait]
impl SelectNode for EpsilonGreedySelect {
    async fn select(
        &self,
        ctx: &PhaseContext,
        taken: &[NodeId],
        rng: &mut SmallRng,
    ) -> pb_core::Result<Picked> {
        let tree = ctx.tree.read().await;
        let candidates: Vec<(NodeId, Value)> = tree
            .sorted()
            .iter()
            .filter(|n| n.depth < ctx.config.phase_params.max_depth)
            .filter(|n| !taken.iter().any(|&t| tree.overlapping(t, n.id())))
            .map(|n| (n.id(), n.value))
            .collect();
        let epsilon = ctx.config.phase_params.exploration_probability;
        let picked = match () {
            _ if candidates.is_empty() => None,
            _ if rng.random::<f32>() < epsilon => uniform(&candidates, rng),
            _ if epsilon == 0.0 => greedy(&candidates),
            _ => softmax(&candidates, rng),
        };
        Ok(picked.map(Picked::Node).unwrap_or(Picked::NoCandidate))
    }
}

/// One evaluator call carrying the node's challenge keys and the phase's
/// environment name; the service owns the per-attempt retry loop.
pub struct StandardEvaluate;

#[async_trait]
impl EvaluateNode for StandardEvaluate {
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
            params: serde_json::Value::Null,
        };
        ctx.evaluator.run_challenge(request, token).await
    }
}

/// Reward decays by `discount_factor` per step of distance; every ancestor
/// is pulled toward its discounted target once per evaluation.
pub struct DiscountedBackprop;

impl BackpropagateNodeValue for DiscountedBackprop {
    fn backpropagate(
        &self,
        tree: &mut Tree,
        node: NodeId,
        reward: Reward,
        params: &SearchParams,
    ) -> pb_core::Result<()> {
        tree.backpropagate(node, reward, params.learning_rate, params.discount_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PhaseContext;
    use pb_config::EnvironmentConfig;
    use pb_config::PhaseConfig;
    use pb_evaluator::FixedEvaluator;
    use pb_tree::Tree;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn candidates(n: usize) -> Vec<(NodeId, Value)> {
        (0..n).map(|i| (NodeId::default(), i as Value)).collect()
    }

    fn context(epsilon: f32) -> PhaseContext {
        let mut tree = Tree::new(
            vec!["A".into(), "B".into()],
            vec!["easy".into(), "hard".into()],
        );
        tree.initialize().unwrap();
        let mut config = PhaseConfig {
            phase_params: Default::default(),
            search_params: Default::default(),
            scoring_params: Default::default(),
            environment: EnvironmentConfig {
                name: "standard".into(),
            },
        };
        config.phase_params.exploration_probability = epsilon;
        PhaseContext::new(
            "phase_1",
            config,
            Arc::new(RwLock::new(tree)),
            Arc::new(FixedEvaluator::passing(1)),
            "snapshots",
        )
    }

    #[tokio::test]
    async fn zero_exploration_is_deterministic() {
        let ctx = context(0.0);
        let hot = {
            let mut tree = ctx.tree.write().await;
            let hot = tree.sorted()[1].id();
            tree.get_mut(hot).unwrap().nudge(5.0, 1.0);
            hot
        };
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let picked = EpsilonGreedySelect.select(&ctx, &[], &mut rng).await.unwrap();
            assert_eq!(picked, Picked::Node(hot));
        }
    }
    #[tokio::test]
    async fn full_exploration_draws_uniformly() {
        let ctx = context(1.0);
        let mut rng = SmallRng::seed_from_u64(13);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            match EpsilonGreedySelect.select(&ctx, &[], &mut rng).await.unwrap() {
                Picked::Node(id) => seen.insert(id),
                Picked::NoCandidate => panic!("candidates exist"),
            };
        }
        assert_eq!(seen.len(), 3);
    }
    #[tokio::test]
    async fn taken_chains_are_excluded() {
        let ctx = context(0.0);
        let pair = {
            let tree = ctx.tree.read().await;
            tree.sorted()
                .iter()
                .find(|n| n.depth == 1)
                .map(|n| n.id())
                .unwrap()
        };
        let mut rng = SmallRng::seed_from_u64(13);
        // the pair's ancestors are both roots, so nothing is left
        let picked = EpsilonGreedySelect
            .select(&ctx, &[pair], &mut rng)
            .await
            .unwrap();
        assert_eq!(picked, Picked::NoCandidate);
    }

    #[test]
    fn greedy_picks_highest_value() {
        let pool = candidates(4);
        assert_eq!(greedy(&pool), Some(pool[3].0));
    }
    #[test]
    fn greedy_breaks_ties_by_smallest_id() {
        let a = NodeId::default();
        let b = NodeId::default();
        let pool = vec![(b, 1.0), (a, 1.0)];
        assert_eq!(greedy(&pool), Some(a.min(b)));
    }
    #[test]
    fn softmax_prefers_hot_candidates() {
        let mut rng = SmallRng::seed_from_u64(7);
        let cold = NodeId::default();
        let hot = NodeId::default();
        let pool = vec![(cold, 0.0), (hot, 10.0)];
        let hits = (0..100)
            .filter(|_| softmax(&pool, &mut rng) == Some(hot))
            .count();
        assert!(hits > 90);
    }
    #[test]
    fn uniform_covers_the_pool() {
        let mut rng = SmallRng::seed_from_u64(7);
        let pool = candidates(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(uniform(&pool, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
    #[test]
    fn empty_pool_yields_nothing() {
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(greedy(&[]), None);
        assert_eq!(uniform(&[], &mut rng), None);
        assert_eq!(softmax(&[], &mut rng), None);
    }
}
