//! Driver loop for pollable tasks
//!
//! The engine spawns no threads; this loop polls a task until it reaches
//! a terminal state, forwards progress to an injected sink, and converts
//! an interrupt signal into a cancellation request. Wall-clock budget
//! policy (abort-on-timeout, retries) is left to whoever calls this.

use crate::task::{Task, TaskState};
use crate::utils::error::Result;
use crate::utils::signal;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Receives task progress. The engine has no opinion about presentation;
/// the CLI renders a progress bar, tests record the calls.
pub trait ProgressSink {
    fn on_state(&mut self, _state: TaskState) {}
    fn on_progress(&mut self, _percent: f64, _message: &str, _eta_secs: f64) {}
}

/// Sink that discards everything.
#[allow(dead_code)]
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Set up a task and poll it to completion.
///
/// Returns the terminal state. Setup failures (missing partition, worker
/// not spawnable) propagate as errors; worker failures after a successful
/// spawn surface through the returned state and the task message.
pub fn drive_task(
    task: &mut dyn Task,
    poll_interval: Duration,
    sink: &mut dyn ProgressSink,
) -> Result<TaskState> {
    info!("Starting task: {}", task.description());
    task.setup()?;

    let mut last_state = task.state();
    sink.on_state(last_state);

    while !task.state().is_terminal() {
        if signal::is_interrupted() {
            task.cancel();
        }
        task.poll();
        sink.on_progress(task.percent(), task.message(), task.time_estimate_secs());
        if task.state() != last_state {
            last_state = task.state();
            sink.on_state(last_state);
        }
        if task.state().is_terminal() {
            break;
        }
        thread::sleep(poll_interval);
    }

    info!(
        "Task {}: {} ({})",
        task.id(),
        task.state(),
        task.message()
    );
    Ok(task.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Scripted task that succeeds after a fixed number of polls.
    struct ScriptedTask {
        id: Uuid,
        state: TaskState,
        percent: f64,
        polls_left: u32,
        cancelled: bool,
    }

    impl ScriptedTask {
        fn new(polls: u32) -> Self {
            Self {
                id: Uuid::new_v4(),
                state: TaskState::Pending,
                percent: 0.0,
                polls_left: polls,
                cancelled: false,
            }
        }
    }

    impl Task for ScriptedTask {
        fn id(&self) -> Uuid {
            self.id
        }
        fn description(&self) -> &str {
            "scripted"
        }
        fn state(&self) -> TaskState {
            self.state
        }
        fn percent(&self) -> f64 {
            self.percent
        }
        fn message(&self) -> &str {
            "working"
        }
        fn time_estimate_secs(&self) -> f64 {
            10.0
        }
        fn setup(&mut self) -> Result<()> {
            self.state = TaskState::Running;
            Ok(())
        }
        fn poll(&mut self) {
            if self.state != TaskState::Running {
                return;
            }
            if self.cancelled {
                self.state = TaskState::Cancelled;
                return;
            }
            self.percent += 25.0;
            self.polls_left -= 1;
            if self.polls_left == 0 {
                self.percent = 100.0;
                self.state = TaskState::Succeeded;
            }
        }
        fn cancel(&mut self) {
            if !self.state.is_terminal() {
                self.cancelled = true;
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        states: Vec<TaskState>,
        percents: Vec<f64>,
    }

    impl ProgressSink for RecordingSink {
        fn on_state(&mut self, state: TaskState) {
            self.states.push(state);
        }
        fn on_progress(&mut self, percent: f64, _message: &str, _eta: f64) {
            self.percents.push(percent);
        }
    }

    #[test]
    fn drives_task_to_success_and_reports_each_state_once() {
        let mut task = ScriptedTask::new(4);
        let mut sink = RecordingSink::default();

        let state = drive_task(&mut task, Duration::from_millis(1), &mut sink).unwrap();

        assert_eq!(state, TaskState::Succeeded);
        assert_eq!(sink.states, vec![TaskState::Running, TaskState::Succeeded]);
        assert_eq!(sink.percents.len(), 4);
        assert!(sink
            .percents
            .windows(2)
            .all(|pair| pair[1] >= pair[0]));
    }

    #[test]
    fn null_sink_is_fine() {
        let mut task = ScriptedTask::new(2);
        let state = drive_task(&mut task, Duration::from_millis(1), &mut NullSink).unwrap();
        assert_eq!(state, TaskState::Succeeded);
    }
}
