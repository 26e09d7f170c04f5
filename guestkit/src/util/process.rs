//! Process utilities for appliance subprocess signalling and reaping.

use guestkit_shared::GuestkitResult;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// Check if a process with the given PID exists.
///
/// Sends the null signal, so a process owned by another user counts as
/// gone.
pub fn is_process_alive(pid: i32) -> bool {
    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}

/// Send `signal` to `pid`.
///
/// A process that no longer exists is not an error.
pub fn signal_process(pid: Pid, signal: Signal) -> GuestkitResult<()> {
    match kill(pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Block until `pid` exits and reap it.
pub fn wait_for_exit(pid: Pid) -> GuestkitResult<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return Ok(other?),
        }
    }
}
