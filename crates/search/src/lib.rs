//! Pluggable per-phase strategies and the MCTS phase engine.
//!
//! A phase is a parameterised run of the search loop against a named
//! strategy set resolved from the [`Registry`]. The engine owns scheduling,
//! the ancestor-disjoint batch constraint, convergence detection, and
//! snapshots; the strategies own what to pick, how to judge it, and how the
//! frontier grows.

mod context;
mod engine;
mod phase_discovery;
mod phase_evaluation;
mod phase_mapping;
mod registry;
mod slots;

pub use context::PhaseContext;
pub use engine::PhaseEngine;
pub use engine::PhaseOutcome;
pub use engine::PhaseReport;
pub use registry::BackpropagateNodeValue;
pub use registry::CalculateNodeValue;
pub use registry::EvaluateNode;
pub use registry::ExpandNode;
pub use registry::Expanded;
pub use registry::InitializePhase;
pub use registry::Picked;
pub use registry::Registry;
pub use registry::SelectNode;
pub use registry::Strategies;
pub use registry::StrategySet;
pub use slots::DiscountedBackprop;
pub use slots::EpsilonGreedySelect;
pub use slots::StandardEvaluate;
