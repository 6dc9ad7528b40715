use chrono::DateTime;
use chrono::Utc;
use pb_core::ID;
use pb_core::Unique;
use serde::Deserialize;
use serde::Serialize;

pub type TaskId = ID<Task>;

/// Lifecycle states shared by phase entries and the derived task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One phase of a task: its state, timestamps, and last snapshot artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub name: String,
    pub status: PhaseState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl PhaseEntry {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            error: None,
            path: None,
        }
    }
    pub fn start(&mut self) {
        self.status = PhaseState::Running;
        self.started_at = Some(Utc::now());
    }
    pub fn complete(&mut self, path: Option<String>) {
        self.status = PhaseState::Completed;
        self.completed_at = Some(Utc::now());
        self.path = path;
    }
    pub fn fail(&mut self, error: impl Into<String>, path: Option<String>) {
        self.status = PhaseState::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.path = path.or(self.path.take());
    }
    pub fn cancel(&mut self, path: Option<String>) {
        self.status = PhaseState::Cancelled;
        self.cancelled_at = Some(Utc::now());
        self.path = path.or(self.path.take());
    }
}

/// One run of the configured phase sequence over a session.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    pub session: String,
    pub phases: Vec<PhaseEntry>,
}

impl Task {
    pub fn new(session: impl Into<String>, phases: &[String]) -> Self {
        Self {
            id: TaskId::default(),
            session: session.into(),
            phases: phases.iter().map(PhaseEntry::pending).collect(),
        }
    }
    /// Aggregate status, derived from the phase entries.
    pub fn status(&self) -> PhaseState {
        let any = |s: PhaseState| self.phases.iter().any(|p| p.status == s);
        let all = |s: PhaseState| self.phases.iter().all(|p| p.status == s);
        match () {
            _ if any(PhaseState::Running) => PhaseState::Running,
            _ if any(PhaseState::Failed) => PhaseState::Failed,
            _ if any(PhaseState::Cancelled) => PhaseState::Cancelled,
            _ if self.phases.is_empty() || all(PhaseState::Completed) => PhaseState::Completed,
            _ if all(PhaseState::Pending) => PhaseState::Pending,
            _ => PhaseState::Running,
        }
    }
    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id,
            session_id: self.session.clone(),
            status: self.status(),
            phases: self.phases.clone(),
        }
    }
}

impl Unique for Task {
    fn id(&self) -> TaskId {
        self.id
    }
}

/// Wire shape of a task for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub session_id: String,
    pub status: PhaseState,
    pub phases: Vec<PhaseEntry>,
}
