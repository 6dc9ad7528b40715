use crate::request::ChallengeRequest;
use crate::request::JobState;
use crate::request::JobStatus;
use crate::request::JobTicket;
use async_trait::async_trait;
use pb_core::SearchError;
use pb_tree::RunRecord;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Anything that can run a challenge to completion and return the trail.
///
/// The engine only ever sees this trait; the HTTP client below is the
/// production implementation and [`FixedEvaluator`](crate::FixedEvaluator)
/// stands in where no service is running.
#[async_trait]
pub trait Evaluate: Send + Sync {
    async fn run_challenge(
        &self,
        request: ChallengeRequest,
        token: &CancellationToken,
    ) -> pb_core::Result<RunRecord>;
}

/// HTTP client for the evaluation service.
///
/// Submits a job, polls at a fixed interval until the remote reports a
/// terminal state, retries transient transport errors with bounded
/// exponential backoff, and honours cancellation by attempting a remote
/// cancel before returning.
pub struct EvaluatorClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl EvaluatorClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
            timeout,
        }
    }

    /// Exponential backoff delay before retry `attempt` (0-based).
    fn backoff(attempt: u32) -> Duration {
        let delay = pb_core::RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(pb_core::RETRY_MAX_DELAY)
    }

    /// Map a transport-layer outcome to the transient/permanent split.
    /// 5xx and connection failures are worth retrying; 4xx are not.
    fn classify(error: &reqwest::Error) -> SearchError {
        match error.status() {
            Some(code) if code.is_server_error() => {
                SearchError::EvaluatorTransient(error.to_string())
            }
            Some(_) => SearchError::EvaluatorPermanent(error.to_string()),
            None => SearchError::EvaluatorTransient(error.to_string()),
        }
    }

    /// Issue one request, retrying transient failures with backoff.
    async fn fetch<T>(&self, request: reqwest::RequestBuilder) -> pb_core::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let outcome = async {
                let request = request
                    .try_clone()
                    .ok_or_else(|| SearchError::EvaluatorPermanent("unclonable request".into()))?;
                let response = request.send().await.map_err(|e| Self::classify(&e))?;
                let response = response.error_for_status().map_err(|e| Self::classify(&e))?;
                response
                    .json::<T>()
                    .await
                    .map_err(|e| SearchError::EvaluatorTransient(format!("malformed body: {}", e)))
            }
            .await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < pb_core::RETRY_LIMIT => {
                    log::warn!("[evaluator] transient failure, retrying: {}", e);
                    tokio::time::sleep(Self::backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn submit(&self, request: &ChallengeRequest) -> pb_core::Result<JobTicket> {
        self.fetch(self.http.post(format!("{}/jobs", self.base)).json(request))
            .await
    }
    async fn poll(&self, job: &str) -> pb_core::Result<JobStatus> {
        self.fetch(self.http.get(format!("{}/jobs/{}", self.base, job)))
            .await
    }
    /// Best-effort remote cancel; failures are logged and swallowed.
    async fn cancel(&self, job: &str) {
        let _ = self
            .http
            .post(format!("{}/jobs/{}/cancel", self.base, job))
            .send()
            .await
            .inspect_err(|e| log::warn!("[evaluator] cancel of job {} failed: {}", job, e));
    }
}

#[async_trait]
impl Evaluate for EvaluatorClient {
    async fn run_challenge(
        &self,
        request: ChallengeRequest,
        token: &CancellationToken,
    ) -> pb_core::Result<RunRecord> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let ticket = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SearchError::Cancelled),
            ticket = self.submit(&request) => ticket?,
        };
        log::debug!("[evaluator] submitted job {}", ticket.job_id);
        loop {
            if tokio::time::Instant::now() >= deadline {
                self.cancel(&ticket.job_id).await;
                return Err(SearchError::EvaluatorPermanent(format!(
                    "job {} timed out after {:?}",
                    ticket.job_id, self.timeout
                )));
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.cancel(&ticket.job_id).await;
                    return Err(SearchError::Cancelled);
                }
                _ = tokio::time::sleep(pb_core::POLL_INTERVAL) => {}
            }
            let status = self.poll(&ticket.job_id).await?;
            match status.status {
                JobState::Completed => {
                    return status.result.ok_or_else(|| {
                        SearchError::EvaluatorPermanent(format!(
                            "job {} completed without a result",
                            ticket.job_id
                        ))
                    });
                }
                JobState::Failed => {
                    return Err(SearchError::EvaluatorPermanent(
                        status
                            .error
                            .unwrap_or_else(|| format!("job {} failed", ticket.job_id)),
                    ));
                }
                JobState::Queued | JobState::Running => continue,
            }
        }
    }
}
