//! Signal handling for prompt task cancellation.
//!
//! Installs SIGINT/SIGTERM handlers so the driver loop can request
//! cancellation of the running imaging task and let the worker exit
//! cleanly before the process ends.
//!
//! - First signal: sets the interrupted flag; the driver loop sees it on
//!   the next poll cycle and cancels the active task.
//! - Second signal: restores the default handler and re-raises, forcing
//!   immediate termination.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Set to `true` by the signal handler on the first SIGINT/SIGTERM.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Counts how many signals have been received.
static SIGNAL_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Signal handler (async-signal-safe).
///
/// First invocation: sets the `INTERRUPTED` flag and writes a short message
/// to stderr using raw `write(2, …)` (which is async-signal-safe).
///
/// Second invocation: restores `SIG_DFL` and re-raises, so the process
/// terminates immediately with the correct signal status.
extern "C" fn handle_signal(sig: libc::c_int) {
    let prev = SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst);

    if prev == 0 {
        // First signal — flag interruption and let the driver loop cancel.
        INTERRUPTED.store(true, Ordering::SeqCst);

        let msg = b"\nInterrupt received, cancelling task...\n";
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        }
    } else {
        // Second (or later) signal — force-exit.
        let msg = b"\nForced exit - the imaging worker may have been left running\n";
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
            libc::signal(sig, libc::SIG_DFL);
            libc::raise(sig);
        }
    }
}

/// Install signal handlers for SIGINT and SIGTERM.
///
/// Safe to call more than once (idempotent).
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_signal as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_signal as *const () as libc::sighandler_t,
        );
    }
}

/// Returns `true` if an interrupt signal has been received.
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
