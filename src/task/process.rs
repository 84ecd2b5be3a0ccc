//! Polled subprocess lifecycle
//!
//! [`ProcessTask`] runs one external worker with piped output and exposes
//! the non-blocking `setup`/`poll`/`cancel` lifecycle the driver loop
//! expects. Progress interpretation is delegated to the injected
//! [`ProgressParser`], so the runner itself knows nothing about any
//! particular worker's output format.

use crate::task::progress::{ProgressParser, ProgressUpdate};
use crate::task::TaskState;
use crate::utils::error::{RefurbixError, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Keep at most this much unconsumed stderr around for failure messages.
const STDERR_TAIL_BYTES: usize = 8192;

/// One run of an external worker process.
pub struct ProcessTask {
    id: Uuid,
    description: String,
    state: TaskState,
    percent: f64,
    message: String,
    time_estimate_secs: f64,
    started_at: Option<Instant>,
    child: Option<Child>,
    child_stdout: Option<ChildStdout>,
    child_stderr: Option<ChildStderr>,
    out_buf: Vec<u8>,
    err_buf: Vec<u8>,
    cancel_requested: bool,
    parser: Box<dyn ProgressParser>,
}

impl ProcessTask {
    pub fn new(description: impl Into<String>, parser: Box<dyn ProgressParser>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            state: TaskState::Pending,
            percent: 0.0,
            message: String::new(),
            time_estimate_secs: 0.0,
            started_at: None,
            child: None,
            child_stdout: None,
            child_stderr: None,
            out_buf: Vec::new(),
            err_buf: Vec::new(),
            cancel_requested: false,
            parser,
        }
    }

    /// Seed the time estimate before any real progress samples arrive.
    pub fn with_time_estimate(mut self, secs: f64) -> Self {
        self.time_estimate_secs = secs;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn time_estimate_secs(&self) -> f64 {
        self.time_estimate_secs
    }

    /// Seconds since the worker was spawned (0 before `setup`).
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Spawn the worker and transition to Running.
    ///
    /// Both output pipes are switched to non-blocking mode so `poll` can
    /// drain whatever is available without ever stalling the driver loop.
    pub fn setup(&mut self, argv: &[String]) -> Result<()> {
        if self.state != TaskState::Pending {
            return Ok(());
        }
        let (program, args) = argv.split_first().ok_or_else(|| {
            RefurbixError::Configuration("empty worker invocation".to_string())
        })?;

        debug!("Spawning worker: {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.transition(TaskState::Failed, format!("Failed to start {}: {}", program, e));
                RefurbixError::ProcessSpawn {
                    program: program.clone(),
                    source: e,
                }
            })?;

        self.child_stdout = child.stdout.take();
        self.child_stderr = child.stderr.take();
        self.child = Some(child);
        if let Some(out) = &self.child_stdout {
            set_nonblocking(out.as_raw_fd())?;
        }
        if let Some(err) = &self.child_stderr {
            set_nonblocking(err.as_raw_fd())?;
        }

        self.started_at = Some(Instant::now());
        self.transition(TaskState::Running, "Started".to_string());
        Ok(())
    }

    /// Drain available output, feed complete lines to the parser, and
    /// check for process exit. Non-blocking; a no-op once terminal.
    pub fn poll(&mut self) {
        if self.state != TaskState::Running {
            return;
        }

        self.drain_output();
        self.consume_lines();

        let status = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    warn!("Wait on worker failed: {}", e);
                    None
                }
            },
            None => None,
        };

        if let Some(status) = status {
            // The pipes may still hold the worker's final lines.
            self.drain_output();
            self.consume_lines();
            self.child = None;
            self.child_stdout = None;
            self.child_stderr = None;
            self.finish(status);
        }
    }

    /// Request termination. Idempotent; valid in every non-terminal state.
    ///
    /// A Pending task cancels immediately. A Running task gets SIGTERM and
    /// becomes Cancelled on a later `poll` once the exit is observed.
    pub fn cancel(&mut self) {
        match self.state {
            TaskState::Pending => {
                self.transition(TaskState::Cancelled, "Cancelled before start".to_string());
            }
            TaskState::Running => {
                if self.cancel_requested {
                    return;
                }
                self.cancel_requested = true;
                self.message = "Cancelling".to_string();
                if let Some(child) = &self.child {
                    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                        // Worker likely already exited; poll will reap it.
                        debug!("SIGTERM to worker failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    /// Mark a Pending task terminally Failed without spawning anything.
    pub(crate) fn fail_early(&mut self, message: impl Into<String>) {
        if self.state == TaskState::Pending {
            self.transition(TaskState::Failed, message.into());
        }
    }

    fn transition(&mut self, state: TaskState, message: String) {
        if self.state.is_terminal() {
            return;
        }
        info!("[{}] {} -> {}: {}", self.id, self.state, state, message);
        self.state = state;
        self.message = message;
    }

    fn drain_output(&mut self) {
        drain_pipe(self.child_stdout.as_mut(), &mut self.out_buf);
        drain_pipe(self.child_stderr.as_mut(), &mut self.err_buf);
        if self.err_buf.len() > STDERR_TAIL_BYTES {
            let excess = self.err_buf.len() - STDERR_TAIL_BYTES;
            self.err_buf.drain(..excess);
        }
    }

    fn consume_lines(&mut self) {
        let wall_elapsed = self.elapsed_secs();
        for line in take_complete_lines(&mut self.out_buf) {
            trace!("worker: {}", line);
            if let Some(update) = self.parser.feed_line(&line, wall_elapsed) {
                self.apply_update(update);
            }
        }
    }

    fn apply_update(&mut self, update: ProgressUpdate) {
        if let Some(estimate) = update.time_estimate_secs {
            self.time_estimate_secs = estimate;
        }
        // Progress never moves backwards while running.
        self.percent = self.percent.max(update.percent.clamp(0.0, 100.0));
        self.message = update.message;
    }

    fn finish(&mut self, status: ExitStatus) {
        if self.cancel_requested {
            self.transition(TaskState::Cancelled, "Cancelled".to_string());
        } else if status.success() {
            self.percent = 100.0;
            self.transition(TaskState::Succeeded, "Completed".to_string());
        } else {
            let message = match status.code() {
                Some(code) => match self.stderr_tail() {
                    Some(tail) => format!("Worker exited with code {}: {}", code, tail),
                    None => format!("Worker exited with code {}", code),
                },
                None => "Worker terminated by signal".to_string(),
            };
            self.transition(TaskState::Failed, message);
        }
    }

    /// Last non-empty stderr line, for failure messages.
    fn stderr_tail(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.err_buf);
        text.lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

impl Drop for ProcessTask {
    fn drop(&mut self) {
        // Never leak a running worker.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Read whatever is currently available from a non-blocking pipe.
fn drain_pipe<R: Read>(pipe: Option<&mut R>, buf: &mut Vec<u8>) {
    let Some(pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!("pipe read error: {}", e);
                break;
            }
        }
    }
}

/// Split off every complete newline-terminated line, leaving any trailing
/// partial line in the buffer for the next poll cycle.
fn take_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::progress::PartcloneProgressParser;
    use std::thread;
    use std::time::Duration;

    fn poll_to_completion(task: &mut ProcessTask) {
        for _ in 0..200 {
            task.poll();
            if task.state().is_terminal() {
                return;
            }
            thread::sleep(Duration::from_millis(25));
        }
        panic!("task did not reach a terminal state");
    }

    fn sh_task(script: &str) -> (ProcessTask, Vec<String>) {
        let task = ProcessTask::new(
            format!("sh: {}", script),
            Box::new(PartcloneProgressParser::new()),
        );
        let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        (task, argv)
    }

    #[test]
    fn take_complete_lines_keeps_partial_tail() {
        let mut buf = b"one\ntwo\r\nthree".to_vec();
        let lines = take_complete_lines(&mut buf);
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buf, b"three");

        buf.extend_from_slice(b" more\n");
        let lines = take_complete_lines(&mut buf);
        assert_eq!(lines, vec!["three more".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn successful_worker_reaches_succeeded() {
        let (mut task, argv) = sh_task("echo 'File system:  EXTFS'");
        task.setup(&argv).unwrap();
        assert_eq!(task.state(), TaskState::Running);

        poll_to_completion(&mut task);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.percent(), 100.0);

        // Terminal state is sticky; further polls are no-ops.
        task.poll();
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[test]
    fn nonzero_exit_reaches_failed_with_code() {
        let (mut task, argv) = sh_task("echo oops >&2; exit 3");
        task.setup(&argv).unwrap();
        poll_to_completion(&mut task);

        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.message().contains("code 3"), "{}", task.message());
        assert!(task.message().contains("oops"), "{}", task.message());
    }

    #[test]
    fn spawn_failure_is_terminal() {
        let mut task = ProcessTask::new(
            "missing worker",
            Box::new(PartcloneProgressParser::new()),
        );
        let argv = vec!["/nonexistent/refurbix-worker".to_string()];
        let err = task.setup(&argv).unwrap_err();
        assert!(matches!(err, RefurbixError::ProcessSpawn { .. }));
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn progress_lines_update_estimate() {
        let (mut task, argv) = sh_task(
            "echo 'File system:  EXTFS'; \
             echo 'partclone.stderr:Elapsed: 00:00:01, Remaining: 00:00:09, Completed: 10.00%, 1.0GB/min,'",
        );
        task.setup(&argv).unwrap();
        poll_to_completion(&mut task);

        assert_eq!(task.state(), TaskState::Succeeded);
        // 0-ish startup + 1 + 9 + 140 sync padding
        assert!(
            (task.time_estimate_secs() - 150.0).abs() < 2.0,
            "estimate was {}",
            task.time_estimate_secs()
        );
    }

    #[test]
    fn cancel_running_worker() {
        let (mut task, argv) = sh_task("sleep 30");
        task.setup(&argv).unwrap();

        task.cancel();
        task.cancel(); // idempotent
        poll_to_completion(&mut task);
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn cancel_pending_task() {
        let (mut task, _argv) = sh_task("true");
        task.cancel();
        assert_eq!(task.state(), TaskState::Cancelled);

        // No transition out of a terminal state.
        task.poll();
        assert_eq!(task.state(), TaskState::Cancelled);
    }
}
