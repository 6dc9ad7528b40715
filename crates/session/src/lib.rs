//! Session and task management.
//!
//! A session owns one tree and one experiment config; a task is one run of
//! the configured phase sequence against a session. The [`SessionManager`]
//! is the single process-wide owner of both and the only writer of their
//! lifecycles.

mod manager;
mod task;

pub use manager::SessionManager;
pub use manager::TreeView;
pub use task::PhaseEntry;
pub use task::PhaseState;
pub use task::Task;
pub use task::TaskId;
pub use task::TaskView;
