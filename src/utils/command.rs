//! Helpers for short-lived host commands (`blkid`, PATH lookups).
//!
//! The imaging workers themselves are never run through these; they go
//! through the polled [`crate::task::process::ProcessTask`] lifecycle.

use crate::utils::error::{RefurbixError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Execute a command and return stdout as a trimmed string.
pub fn run_command_output(program: &str, args: &[&str]) -> Result<String> {
    debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(RefurbixError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(RefurbixError::Configuration(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Execute a command, allowing it to fail (returns None on failure)
pub fn run_command_optional(program: &str, args: &[&str]) -> Option<String> {
    run_command_output(program, args).ok().filter(|s| !s.is_empty())
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check that a worker program can be launched: absolute and relative paths
/// must exist on disk, bare names must resolve in PATH.
pub fn worker_available(program: &str) -> bool {
    if program.contains('/') {
        Path::new(program).exists()
    } else {
        command_exists(program)
    }
}
