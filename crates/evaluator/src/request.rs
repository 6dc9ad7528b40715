use pb_tree::RunRecord;
use serde::Deserialize;
use serde::Serialize;

/// One challenge submission: which environment should run it, what the
/// challenge is, and how many solution attempts the agents may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub environment: String,
    pub concepts: Vec<String>,
    pub difficulty: String,
    pub max_attempts: usize,
    /// Mode-specific extras, e.g. variations per concept in enhanced mode.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

/// Acknowledgement returned by job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
}

/// Remote job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Poll response: state plus, when terminal, the outcome or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub result: Option<RunRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
