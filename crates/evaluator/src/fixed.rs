use crate::client::Evaluate;
use crate::request::ChallengeRequest;
use async_trait::async_trait;
use pb_core::SearchError;
use pb_tree::RunRecord;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

/// Evaluator that replays a fixed outcome for every challenge.
///
/// Stands in for the remote service in tests and dry runs; counts calls so
/// callers can assert on evaluation traffic.
pub struct FixedEvaluator {
    outcome: RunRecord,
    calls: AtomicUsize,
}

impl FixedEvaluator {
    pub fn new(outcome: RunRecord) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }
    /// A stub that passes every test it is given.
    pub fn passing(tests: usize) -> Self {
        Self::new(RunRecord {
            success: true,
            attempts: 1,
            tests_passed: tests,
            ..RunRecord::default()
        })
    }
    /// A stub where every test fails.
    pub fn failing(tests: usize) -> Self {
        Self::new(RunRecord {
            success: false,
            attempts: 1,
            tests_failed: tests,
            ..RunRecord::default()
        })
    }
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Evaluate for FixedEvaluator {
    async fn run_challenge(
        &self,
        request: ChallengeRequest,
        token: &CancellationToken,
    ) -> pb_core::Result<RunRecord> {
        if token.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut outcome = self.outcome.clone();
        outcome.data_trail = serde_json::json!({
            "environment": request.environment,
            "concepts": request.concepts,
            "difficulty": request.difficulty,
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_outcome_and_counts_calls() {
        let stub = FixedEvaluator::passing(10);
        let token = CancellationToken::new();
        let request = ChallengeRequest {
            environment: "standard".into(),
            concepts: vec!["loops".into()],
            difficulty: "easy".into(),
            max_attempts: 1,
            params: serde_json::Value::Null,
        };
        let outcome = stub.run_challenge(request, &token).await.unwrap();
        assert_eq!(outcome.tests_passed, 10);
        assert_eq!(stub.calls(), 1);
        assert_eq!(outcome.data_trail["difficulty"], "easy");
    }
    #[tokio::test]
    async fn respects_cancellation() {
        let stub = FixedEvaluator::failing(1);
        let token = CancellationToken::new();
        token.cancel();
        let request = ChallengeRequest {
            environment: "standard".into(),
            concepts: vec![],
            difficulty: "easy".into(),
            max_attempts: 1,
            params: serde_json::Value::Null,
        };
        assert!(stub.run_challenge(request, &token).await.is_err());
        assert_eq!(stub.calls(), 0);
    }
}
