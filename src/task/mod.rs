//! Imaging task engine
//!
//! A task wraps one run of an external imaging or restore worker. The
//! engine spawns no threads of its own: an outer driver loop calls
//! [`Task::poll`] on each active task until it reaches a terminal state,
//! and the task drains worker output, parses progress, and updates its
//! completion estimate on each cycle.

pub mod estimate;
pub mod imaging;
pub mod process;
pub mod progress;
pub mod runner;

use crate::utils::error::Result;
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// Transitions are monotonic: Pending → Running → one of the terminal
/// states. Nothing ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A pollable imaging/restore operation.
///
/// `setup` prepares and spawns the worker; the driver then calls `poll`
/// until `state` is terminal. State, progress, message, and the time
/// estimate are readable at any point; `cancel` may be called at any
/// point and is a no-op once the task is terminal.
pub trait Task {
    fn id(&self) -> Uuid;
    fn description(&self) -> &str;
    fn state(&self) -> TaskState;
    /// Progress percent in [0, 100], non-decreasing while Running.
    fn percent(&self) -> f64;
    fn message(&self) -> &str;
    /// Estimated total seconds until completion.
    fn time_estimate_secs(&self) -> f64;
    fn setup(&mut self) -> Result<()>;
    fn poll(&mut self);
    fn cancel(&mut self);
}
