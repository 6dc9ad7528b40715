use crate::node::ChallengeNode;
use crate::node::NodeId;
use crate::viz;
use pb_core::PhaseTag;
use pb_core::Reward;
use pb_core::SearchError;
use pb_core::Unique;
use pb_core::Value;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

/// The challenge DAG: concept roots at the easiest difficulty, grown by the
/// phases through concept combination and difficulty ascent.
///
/// Owns every node through the ID→node map. Links are IDs only, so freeing
/// a node is removal from the map after neighbour lists are patched.
#[derive(Debug, Clone)]
pub struct Tree {
    concepts: Vec<String>,
    difficulties: Vec<String>,
    nodes: HashMap<NodeId, ChallengeNode>,
    initialized: bool,
}

/// Self-describing serde face of a [`Tree`]; also the network export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeExport {
    pub concepts: Vec<String>,
    pub difficulties: Vec<String>,
    pub nodes: Vec<ChallengeNode>,
}

/// Aggregate counters surfaced next to the tree export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_nodes: usize,
    pub total_visits: u64,
    pub total_runs: usize,
    pub max_depth: usize,
    pub nodes_per_phase: BTreeMap<PhaseTag, usize>,
}

impl Tree {
    /// An empty tree over the configured concept and difficulty sets.
    pub fn new(concepts: Vec<String>, difficulties: Vec<String>) -> Self {
        Self {
            concepts,
            difficulties,
            nodes: HashMap::new(),
            initialized: false,
        }
    }
    /// Seed the initial frontier: one root per concept at the easiest
    /// difficulty, then one child per unordered pair of distinct roots.
    pub fn initialize(&mut self) -> pb_core::Result<()> {
        if self.initialized {
            return Err(SearchError::Conflict("tree already initialized".into()));
        }
        let easiest = self
            .difficulties
            .first()
            .cloned()
            .ok_or_else(|| SearchError::InvariantViolation("no difficulties configured".into()))?;
        let mut roots = Vec::new();
        for concept in self.concepts.clone() {
            let id = self.add_node(
                &[],
                Some(BTreeSet::from([concept.clone()])),
                Some(easiest.clone()),
                1,
                None,
            )?;
            roots.push(id);
        }
        for i in 0..roots.len() {
            for j in i + 1..roots.len() {
                self.add_node(&[roots[i], roots[j]], None, Some(easiest.clone()), 1, None)?;
            }
        }
        self.initialized = true;
        log::info!("[tree] initialized with {} nodes", self.nodes.len());
        Ok(())
    }
    /// Create and register a new node.
    ///
    /// Omitted `concepts` default to the union of the parents' concepts;
    /// omitted `difficulty` follows the ascent rule: parents sharing index
    /// `i` yield `difficulties[min(i + 1, last)]`, mixed parents yield the
    /// difficulty of the highest-indexed parent. All-or-nothing: any
    /// invariant violation leaves the tree unchanged.
    pub fn add_node(
        &mut self,
        parents: &[NodeId],
        concepts: Option<BTreeSet<String>>,
        difficulty: Option<String>,
        phase: PhaseTag,
        description: Option<String>,
    ) -> pb_core::Result<NodeId> {
        let mut seen = HashSet::new();
        let parents: Vec<NodeId> = parents
            .iter()
            .copied()
            .filter(|p| seen.insert(*p))
            .collect();
        for parent in &parents {
            if !self.nodes.contains_key(parent) {
                return Err(SearchError::InvariantViolation(format!(
                    "parent {} is not in the tree",
                    parent
                )));
            }
        }
        let concepts = match concepts {
            Some(c) => c,
            None => parents
                .iter()
                .flat_map(|p| self.nodes[p].concepts.iter().cloned())
                .collect(),
        };
        if concepts.is_empty() {
            return Err(SearchError::InvariantViolation(
                "node concepts must be non-empty".into(),
            ));
        }
        let difficulty = match difficulty {
            Some(d) => d,
            None => self.ascended(&parents)?,
        };
        if !self.difficulties.contains(&difficulty) {
            return Err(SearchError::InvariantViolation(format!(
                "difficulty '{}' is not in the configured ladder",
                difficulty
            )));
        }
        let depth = parents
            .iter()
            .map(|p| self.nodes[p].depth + 1)
            .max()
            .unwrap_or(0);
        let node = ChallengeNode::new(
            difficulty,
            concepts,
            description.unwrap_or_default(),
            parents.clone(),
            depth,
            phase,
        );
        let id = node.id();
        for parent in &parents {
            self.nodes
                .get_mut(parent)
                .map(|p| p.children.push(id))
                .unwrap_or_default();
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> pb_core::Result<&ChallengeNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| SearchError::NotFound(format!("node {}", id)))
    }
    pub fn get_mut(&mut self, id: NodeId) -> pb_core::Result<&mut ChallengeNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| SearchError::NotFound(format!("node {}", id)))
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn nodes(&self) -> impl Iterator<Item = &ChallengeNode> {
        self.nodes.values()
    }
    /// All nodes in ID order (creation order, since IDs are v7).
    pub fn sorted(&self) -> Vec<&ChallengeNode> {
        let mut nodes: Vec<&ChallengeNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }
    pub fn concepts(&self) -> &[String] {
        &self.concepts
    }
    pub fn difficulties(&self) -> &[String] {
        &self.difficulties
    }

    /// Position of a difficulty in the ladder.
    pub fn difficulty_index(&self, difficulty: &str) -> pb_core::Result<usize> {
        self.difficulties
            .iter()
            .position(|d| d == difficulty)
            .ok_or_else(|| SearchError::InvariantViolation(format!(
                "difficulty '{}' is not in the configured ladder",
                difficulty
            )))
    }
    /// Next difficulty up the ladder, clamped at the top.
    pub fn ascend(&self, difficulty: &str) -> pb_core::Result<&str> {
        let index = self.difficulty_index(difficulty)?;
        let index = (index + 1).min(self.difficulties.len() - 1);
        Ok(&self.difficulties[index])
    }
    /// Difficulty ascent rule for a child of `parents`: parents sharing one
    /// level step up (clamped); mixed parents keep the highest level.
    /// No parents means the easiest difficulty.
    fn ascended(&self, parents: &[NodeId]) -> pb_core::Result<String> {
        let mut indices = Vec::new();
        for parent in parents {
            indices.push(self.difficulty_index(&self.nodes[parent].difficulty)?);
        }
        let index = match indices.as_slice() {
            [] => 0,
            [first, rest @ ..] if rest.iter().all(|i| i == first) => {
                (first + 1).min(self.difficulties.len() - 1)
            }
            _ => indices.iter().copied().max().unwrap_or(0),
        };
        Ok(self.difficulties[index].clone())
    }

    /// Every ancestor of `id` with its minimum path distance, breadth-first.
    pub fn ancestors(&self, id: NodeId) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([(id, 0usize)]);
        while let Some((at, d)) = queue.pop_front() {
            let Some(node) = self.nodes.get(&at) else {
                continue;
            };
            for parent in &node.parents {
                if seen.insert(*parent) {
                    out.push((*parent, d + 1));
                    queue.push_back((*parent, d + 1));
                }
            }
        }
        out
    }
    /// Whether `a` lies on some upward path from `b`.
    pub fn is_ancestor(&self, a: NodeId, b: NodeId) -> bool {
        self.ancestors(b).iter().any(|(id, _)| *id == a)
    }
    /// Whether two selections would race along a shared ancestor chain.
    pub fn overlapping(&self, a: NodeId, b: NodeId) -> bool {
        a == b || self.is_ancestor(a, b) || self.is_ancestor(b, a)
    }

    /// Network/snapshot export; links by ID, nodes in ID order.
    pub fn export(&self) -> TreeExport {
        TreeExport {
            concepts: self.concepts.clone(),
            difficulties: self.difficulties.clone(),
            nodes: self.sorted().into_iter().cloned().collect(),
        }
    }
    /// Rebuild a tree from an export, re-checking the structural invariants.
    pub fn load(export: TreeExport) -> pb_core::Result<Self> {
        let tree = Self {
            concepts: export.concepts,
            difficulties: export.difficulties,
            initialized: !export.nodes.is_empty(),
            nodes: export.nodes.into_iter().map(|n| (n.id(), n)).collect(),
        };
        tree.check()?;
        Ok(tree)
    }
    /// Structural invariants: referential integrity, acyclicity, the depth
    /// law, concept/difficulty membership.
    pub fn check(&self) -> pb_core::Result<()> {
        for node in self.nodes.values() {
            for link in node.parents.iter().chain(node.children.iter()) {
                if !self.nodes.contains_key(link) {
                    return Err(SearchError::InvariantViolation(format!(
                        "node {} links to missing node {}",
                        node.id(),
                        link
                    )));
                }
            }
            if node.concepts.is_empty() {
                return Err(SearchError::InvariantViolation(format!(
                    "node {} has no concepts",
                    node.id()
                )));
            }
            self.difficulty_index(&node.difficulty)?;
            let expected = match node.parents.is_empty() {
                true => 0,
                false => node
                    .parents
                    .iter()
                    .filter_map(|p| self.nodes.get(p))
                    .map(|p| p.depth + 1)
                    .max()
                    .unwrap_or(0),
            };
            // depth strictly decreases along every parent edge, so this law
            // holding everywhere also rules out cycles
            if node.depth != expected {
                return Err(SearchError::InvariantViolation(format!(
                    "node {} depth {} disagrees with parents ({})",
                    node.id(),
                    node.depth,
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Write `tree.<phase>.<iteration>.json` (authoritative) and
    /// `tree.<phase>.<iteration>.svg` (regenerable) under `dir`.
    /// Returns the path of the JSON artifact.
    pub fn snapshot(
        &self,
        dir: impl AsRef<Path>,
        phase: PhaseTag,
        iteration: usize,
    ) -> pb_core::Result<PathBuf> {
        std::fs::create_dir_all(dir.as_ref())?;
        let json = dir
            .as_ref()
            .join(format!("tree.{}.{}.json", phase, iteration));
        let svg = dir.as_ref().join(format!("tree.{}.{}.svg", phase, iteration));
        std::fs::write(&json, serde_json::to_string_pretty(&self.export())?)?;
        std::fs::write(&svg, viz::render(self))?;
        log::debug!("[tree] snapshot {}", json.display());
        Ok(json)
    }

    pub fn statistics(&self) -> Statistics {
        let mut nodes_per_phase = BTreeMap::new();
        for node in self.nodes.values() {
            *nodes_per_phase.entry(node.phase).or_insert(0) += 1;
        }
        Statistics {
            total_nodes: self.nodes.len(),
            total_visits: self.nodes.values().map(|n| n.visits() as u64).sum(),
            total_runs: self.nodes.values().map(|n| n.run_results.len()).sum(),
            max_depth: self.nodes.values().map(|n| n.depth).max().unwrap_or(0),
            nodes_per_phase,
        }
    }

    /// Snapshot of every node's current value, keyed by ID.
    /// The engine diffs successive maps for its convergence check.
    pub fn values(&self) -> HashMap<NodeId, Value> {
        self.nodes.iter().map(|(id, n)| (*id, n.value)).collect()
    }

    /// Apply one reward to every ancestor of `id`, nearest first, each
    /// exactly once at its minimum path distance. The evaluated node itself
    /// is updated at distance zero.
    pub fn backpropagate(
        &mut self,
        id: NodeId,
        reward: Reward,
        learning_rate: Value,
        discount_factor: Value,
    ) -> pb_core::Result<()> {
        self.get(id)?;
        let mut updates = vec![(id, 0usize)];
        updates.extend(self.ancestors(id));
        for (at, distance) in updates {
            let target = reward * discount_factor.powi(distance as i32);
            let node = self.get_mut(at)?;
            node.nudge(target, learning_rate);
            node.visit();
        }
        Ok(())
    }
}

impl From<&pb_config::TreeConfig> for Tree {
    fn from(config: &pb_config::TreeConfig) -> Self {
        Self::new(config.concepts.clone(), config.difficulties.clone())
    }
}
