use crate::node::RunRecord;
use pb_config::ScoringParams;
use pb_core::Reward;

/// Reward multiplier for a difficulty at ladder position `index`.
/// Rises monotonically so harder levels are worth more.
pub fn difficulty_multiplier(index: usize) -> Reward {
    1.0 + 0.25 * index as Reward
}

/// The raw scoring rule: pass-ratio base scaled by difficulty, minus
/// penalties for failures, errors, extra attempts, and fixer involvement.
pub fn performance_score(outcome: &RunRecord, params: &ScoringParams, multiplier: Reward) -> Reward {
    let total = outcome.tests_passed + outcome.tests_failed + outcome.tests_errored;
    let passed = outcome.tests_passed.min(params.max_num_passed);
    let base = multiplier * passed as Reward / total.max(1) as Reward;
    let fixer = match outcome.fixed_by_problem_fixer {
        true => params.fixed_by_problem_fixer_penalty,
        false => 0.0,
    };
    base - params.penalty_per_failure * outcome.tests_failed as Reward
        - params.penalty_per_error * outcome.tests_errored as Reward
        - params.penalty_per_attempt * outcome.attempts.saturating_sub(1) as Reward
        - fixer
}
