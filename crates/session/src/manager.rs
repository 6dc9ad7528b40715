use crate::task::PhaseState;
use crate::task::Task;
use crate::task::TaskId;
use crate::task::TaskView;
use pb_config::Settings;
use pb_core::SearchError;
use pb_core::Unique;
use pb_evaluator::Evaluate;
use pb_search::PhaseContext;
use pb_search::PhaseEngine;
use pb_search::PhaseOutcome;
use pb_search::Registry;
use pb_tree::Statistics;
use pb_tree::Tree;
use pb_tree::TreeExport;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Tree export plus its aggregate statistics, as served over the wire.
#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub session_id: String,
    pub tree: TreeExport,
    pub statistics: Statistics,
}

/// One experiment scope: the tree and the task currently bound to it.
struct Session {
    tree: Arc<RwLock<Tree>>,
    task: Option<TaskId>,
}

/// Handle to a spawned task: shared state plus its cancellation token.
struct TaskHandle {
    task: Arc<RwLock<Task>>,
    token: CancellationToken,
}

/// Process-wide owner of sessions and tasks.
///
/// Constructed once at startup and injected into the HTTP handlers; there
/// is no hidden global. All map mutations go through the write side of the
/// session/task locks, taken in that order.
pub struct SessionManager {
    settings: Settings,
    registry: Registry,
    evaluator: Arc<dyn Evaluate>,
    sessions: RwLock<HashMap<String, Session>>,
    tasks: RwLock<HashMap<TaskId, TaskHandle>>,
}

impl SessionManager {
    pub fn new(settings: Settings, registry: Registry, evaluator: Arc<dyn Evaluate>) -> Self {
        Self {
            settings,
            registry,
            evaluator,
            sessions: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session with a freshly initialised tree.
    /// Returns the tree size.
    pub async fn initialize(&self, session_id: &str) -> pb_core::Result<usize> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(SearchError::Conflict(format!(
                "session '{}' already exists",
                session_id
            )));
        }
        let mut tree = Tree::from(&self.settings.tree);
        tree.initialize()?;
        let size = tree.len();
        sessions.insert(
            session_id.to_string(),
            Session {
                tree: Arc::new(RwLock::new(tree)),
                task: None,
            },
        );
        log::info!("[manager] session '{}' initialized ({} nodes)", session_id, size);
        Ok(size)
    }

    /// Current tree size of a session.
    pub async fn session_size(&self, session_id: &str) -> pb_core::Result<usize> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SearchError::NotFound(format!("session '{}'", session_id)))?;
        Ok(session.tree.read().await.len())
    }

    /// Current tree export and statistics of a session.
    pub async fn tree(&self, session_id: &str) -> pb_core::Result<TreeView> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SearchError::NotFound(format!("session '{}'", session_id)))?;
        let tree = session.tree.read().await;
        Ok(TreeView {
            session_id: session_id.to_string(),
            tree: tree.export(),
            statistics: tree.statistics(),
        })
    }

    /// Start the configured phase sequence against a session.
    ///
    /// An omitted session ID mints one and auto-initialises it. At most one
    /// active task per session. Returns immediately; the phases advance in
    /// a spawned unit.
    pub async fn run(self: &Arc<Self>, session_id: Option<String>) -> pb_core::Result<TaskView> {
        let session_id = match session_id {
            Some(id) => {
                if !self.sessions.read().await.contains_key(&id) {
                    return Err(SearchError::NotFound(format!("session '{}'", id)));
                }
                id
            }
            None => {
                let id = uuid::Uuid::now_v7().to_string();
                self.initialize(&id).await?;
                id
            }
        };
        let task = Task::new(&session_id, &self.settings.experiment.phase_sequences);
        let task_id = task.id();
        let view = task.view();
        {
            let mut sessions = self.sessions.write().await;
            let mut tasks = self.tasks.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| SearchError::NotFound(format!("session '{}'", session_id)))?;
            if let Some(bound) = session.task {
                let active = match tasks.get(&bound) {
                    Some(handle) => !handle.task.read().await.status().is_terminal(),
                    None => false,
                };
                if active {
                    return Err(SearchError::Conflict(format!(
                        "session '{}' already has an active task {}",
                        session_id, bound
                    )));
                }
            }
            session.task = Some(task_id);
            tasks.insert(
                task_id,
                TaskHandle {
                    task: Arc::new(RwLock::new(task)),
                    token: CancellationToken::new(),
                },
            );
        }
        let manager = self.clone();
        tokio::spawn(async move { manager.drive(task_id).await });
        log::info!("[manager] task {} started on session '{}'", task_id, session_id);
        Ok(view)
    }

    /// Request cooperative cancellation of a task.
    ///
    /// Pending phases flip to cancelled immediately; the running phase
    /// transitions at its next iteration boundary.
    pub async fn stop(&self, task_id: TaskId) -> pb_core::Result<TaskView> {
        let tasks = self.tasks.read().await;
        let handle = tasks
            .get(&task_id)
            .ok_or_else(|| SearchError::NotFound(format!("task {}", task_id)))?;
        let mut task = handle.task.write().await;
        if task.status().is_terminal() {
            return Err(SearchError::InvalidState(format!(
                "task {} is already {:?}",
                task_id,
                task.status()
            )));
        }
        handle.token.cancel();
        for phase in task.phases.iter_mut() {
            if phase.status == PhaseState::Pending {
                phase.cancel(None);
            }
        }
        log::info!("[manager] task {} cancellation requested", task_id);
        Ok(task.view())
    }

    /// One task's view.
    pub async fn task(&self, task_id: TaskId) -> pb_core::Result<TaskView> {
        let tasks = self.tasks.read().await;
        let handle = tasks
            .get(&task_id)
            .ok_or_else(|| SearchError::NotFound(format!("task {}", task_id)))?;
        let task = handle.task.read().await;
        Ok(task.view())
    }

    /// Every task's view.
    pub async fn status(&self) -> Vec<TaskView> {
        let tasks = self.tasks.read().await;
        let mut views = Vec::with_capacity(tasks.len());
        for handle in tasks.values() {
            views.push(handle.task.read().await.view());
        }
        views.sort_by_key(|v| v.task_id);
        views
    }

    /// Advance the task's phases in declared order.
    async fn drive(self: Arc<Self>, task_id: TaskId) {
        let Some((task, token)) = self.handle(task_id).await else {
            return;
        };
        let (session_id, count) = {
            let task = task.read().await;
            (task.session.clone(), task.phases.len())
        };
        for index in 0..count {
            if token.is_cancelled() {
                self.mark(&task, index, |p| p.cancel(None)).await;
                continue;
            }
            let name = task.read().await.phases[index].name.clone();
            self.mark(&task, index, |p| p.start()).await;
            let result = match self.engine(&session_id, &name).await {
                Ok(mut engine) => engine.run(&token).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(report) => {
                    let path = report.snapshot.as_ref().map(|p| p.display().to_string());
                    match report.outcome {
                        PhaseOutcome::Completed { .. } => {
                            self.mark(&task, index, |p| p.complete(path.clone())).await;
                        }
                        PhaseOutcome::Cancelled => {
                            self.mark(&task, index, |p| p.cancel(path.clone())).await;
                        }
                        PhaseOutcome::TimedOut => {
                            self.mark(&task, index, |p| p.fail("timeout", path.clone())).await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::error!("[manager] task {} phase '{}' failed: {}", task_id, name, e);
                    self.mark(&task, index, |p| p.fail(e.to_string(), None)).await;
                    break;
                }
            }
        }
        let status = task.read().await.status();
        log::info!("[manager] task {} finished: {:?}", task_id, status);
    }

    /// Build a phase engine bound to the session's tree.
    async fn engine(&self, session_id: &str, phase: &str) -> pb_core::Result<PhaseEngine> {
        let tree = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .ok_or_else(|| SearchError::NotFound(format!("session '{}'", session_id)))?
                .tree
                .clone()
        };
        let config = self.settings.phase(phase)?.clone();
        let dir = PathBuf::from(&self.settings.server.snapshot_dir).join(session_id);
        let ctx = PhaseContext::new(phase, config, tree, self.evaluator.clone(), dir);
        PhaseEngine::new(&self.registry, ctx)
    }

    async fn handle(&self, task_id: TaskId) -> Option<(Arc<RwLock<Task>>, CancellationToken)> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&task_id)
            .map(|h| (h.task.clone(), h.token.clone()))
    }

    async fn mark(&self, task: &Arc<RwLock<Task>>, index: usize, f: impl FnOnce(&mut crate::PhaseEntry)) {
        let mut task = task.write().await;
        if let Some(phase) = task.phases.get_mut(index) {
            f(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pb_config::EnvironmentConfig;
    use pb_config::ExperimentConfig;
    use pb_config::PhaseConfig;
    use pb_config::ServerConfig;
    use pb_config::TreeConfig;
    use pb_evaluator::ChallengeRequest;
    use pb_evaluator::FixedEvaluator;
    use pb_tree::RunRecord;
    use std::time::Duration;

    /// Evaluator that parks until cancellation, keeping a phase running.
    struct Hanging;

    #[async_trait]
    impl Evaluate for Hanging {
        async fn run_challenge(
            &self,
            _: ChallengeRequest,
            token: &CancellationToken,
        ) -> pb_core::Result<RunRecord> {
            token.cancelled().await;
            Err(SearchError::Cancelled)
        }
    }

    fn settings(dir: &std::path::Path, iterations: usize) -> Settings {
        let mut phase = PhaseConfig {
            phase_params: Default::default(),
            search_params: Default::default(),
            scoring_params: Default::default(),
            environment: EnvironmentConfig {
                name: "standard".into(),
            },
        };
        phase.phase_params.max_iterations = iterations;
        phase.phase_params.num_nodes_per_iteration = 1;
        phase.phase_params.convergence_checks = usize::MAX;
        Settings {
            experiment: ExperimentConfig {
                name: "test".into(),
                description: None,
                phase_sequences: vec!["phase_1".into(), "phase_2".into()],
            },
            phases: [
                ("phase_1".to_string(), phase.clone()),
                ("phase_2".to_string(), phase),
            ]
            .into(),
            tree: TreeConfig {
                concepts: vec!["A".into(), "B".into()],
                difficulties: vec!["easy".into(), "hard".into()],
            },
            server: ServerConfig {
                snapshot_dir: dir.display().to_string(),
                ..ServerConfig::default()
            },
        }
    }

    fn manager(dir: &std::path::Path, iterations: usize, evaluator: Arc<dyn Evaluate>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            settings(dir, iterations),
            Registry::discover(),
            evaluator,
        ))
    }

    async fn wait_terminal(manager: &SessionManager, task_id: TaskId) -> TaskView {
        for _ in 0..250 {
            let view = manager.task(task_id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task {} never reached a terminal state", task_id);
    }

    #[tokio::test]
    async fn initialize_seeds_the_configured_tree() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        // C + C(C-1)/2 with C = 2
        assert_eq!(manager.initialize("s1").await.unwrap(), 3);
        assert_eq!(manager.session_size("s1").await.unwrap(), 3);
    }
    #[tokio::test]
    async fn duplicate_session_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        manager.initialize("s1").await.unwrap();
        assert!(matches!(
            manager.initialize("s1").await,
            Err(SearchError::Conflict(_))
        ));
        assert_eq!(manager.session_size("s1").await.unwrap(), 3);
    }
    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        assert!(matches!(
            manager.session_size("nope").await,
            Err(SearchError::NotFound(_))
        ));
        assert!(matches!(
            manager.run(Some("nope".into())).await,
            Err(SearchError::NotFound(_))
        ));
    }
    #[tokio::test]
    async fn zero_iteration_phases_complete_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        manager.initialize("s1").await.unwrap();
        let view = manager.run(Some("s1".into())).await.unwrap();
        assert_eq!(view.status, PhaseState::Pending);
        assert_eq!(view.phases.len(), 2);
        let done = wait_terminal(&manager, view.task_id).await;
        assert_eq!(done.status, PhaseState::Completed);
        assert!(done.phases.iter().all(|p| p.status == PhaseState::Completed));
        let tree = manager.tree("s1").await.unwrap();
        assert_eq!(tree.statistics.total_runs, 0);
    }
    #[tokio::test]
    async fn omitted_session_is_minted_and_initialised() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        let view = manager.run(None).await.unwrap();
        assert_eq!(manager.session_size(&view.session_id).await.unwrap(), 3);
        wait_terminal(&manager, view.task_id).await;
    }
    #[tokio::test]
    async fn second_active_task_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 10, Arc::new(Hanging));
        manager.initialize("s1").await.unwrap();
        let first = manager.run(Some("s1".into())).await.unwrap();
        assert!(matches!(
            manager.run(Some("s1".into())).await,
            Err(SearchError::Conflict(_))
        ));
        manager.stop(first.task_id).await.unwrap();
        wait_terminal(&manager, first.task_id).await;
        // a finished task no longer blocks the session
        manager.run(Some("s1".into())).await.unwrap();
    }
    #[tokio::test]
    async fn stop_cancels_running_and_pending_phases() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 10, Arc::new(Hanging));
        manager.initialize("s1").await.unwrap();
        let view = manager.run(Some("s1".into())).await.unwrap();
        // let the first phase actually start
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stopped = manager.stop(view.task_id).await.unwrap();
        assert!(stopped.phases.iter().any(|p| p.status == PhaseState::Cancelled));
        let done = wait_terminal(&manager, view.task_id).await;
        assert_eq!(done.status, PhaseState::Cancelled);
        assert!(done.phases.iter().all(|p| p.status == PhaseState::Cancelled));
        // the tree survives cancellation intact
        let tree = manager.tree("s1").await.unwrap();
        assert!(Tree::load(tree.tree).is_ok());
    }
    #[tokio::test]
    async fn stop_on_terminal_task_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        manager.initialize("s1").await.unwrap();
        let view = manager.run(Some("s1".into())).await.unwrap();
        let done = wait_terminal(&manager, view.task_id).await;
        assert_eq!(done.status, PhaseState::Completed);
        assert!(matches!(
            manager.stop(view.task_id).await,
            Err(SearchError::InvalidState(_))
        ));
        // state unchanged
        assert_eq!(
            manager.task(view.task_id).await.unwrap().status,
            PhaseState::Completed
        );
    }
    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        assert!(matches!(
            manager.stop(TaskId::default()).await,
            Err(SearchError::NotFound(_))
        ));
        assert!(matches!(
            manager.task(TaskId::default()).await,
            Err(SearchError::NotFound(_))
        ));
    }
    #[tokio::test]
    async fn status_lists_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 0, Arc::new(FixedEvaluator::passing(10)));
        manager.initialize("s1").await.unwrap();
        manager.initialize("s2").await.unwrap();
        let a = manager.run(Some("s1".into())).await.unwrap();
        let b = manager.run(Some("s2".into())).await.unwrap();
        wait_terminal(&manager, a.task_id).await;
        wait_terminal(&manager, b.task_id).await;
        let views = manager.status().await;
        assert_eq!(views.len(), 2);
    }
    #[tokio::test]
    async fn evaluated_runs_land_in_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), 1);
        settings.experiment.phase_sequences = vec!["phase_1".into()];
        let manager = Arc::new(SessionManager::new(
            settings,
            Registry::discover(),
            Arc::new(FixedEvaluator::passing(10)),
        ));
        manager.initialize("s1").await.unwrap();
        let view = manager.run(Some("s1".into())).await.unwrap();
        let done = wait_terminal(&manager, view.task_id).await;
        assert_eq!(done.status, PhaseState::Completed);
        assert!(done.phases[0].path.as_deref().unwrap().contains("tree.1.0"));
        let tree = manager.tree("s1").await.unwrap();
        assert_eq!(tree.statistics.total_runs, 1);
        assert!(tree.statistics.total_visits > 0);
    }
}
