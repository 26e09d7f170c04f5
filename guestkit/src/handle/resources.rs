//! OS resources owned by a session.
//!
//! The launch sequence fills these in; close releases them. Descriptors are
//! [`OwnedFd`] and the temp directory is a [`TempDirGuard`], so dropping a
//! session on any path releases them too.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use guestkit_shared::constants::tmpdir;
use guestkit_shared::{GuestkitError, GuestkitResult};
use nix::errno::Errno;
use nix::unistd::Pid;

use super::HandleId;
use super::session::Session;
use crate::logging::teardown_event;
use crate::util::process::{is_process_alive, wait_for_exit};

/// Number of console/control pipe slots.
pub const CONSOLE_SLOTS: usize = 2;

/// Session temp directory, removed on drop.
///
/// Removal deletes the `sock` file the appliance listens on, then the
/// directory itself. Anything else left in the directory makes removal fail;
/// the failure is logged and the directory stays.
#[derive(Debug)]
pub struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    /// Create `guestkit<random>` under the system temp directory.
    pub fn create() -> GuestkitResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(tmpdir::PREFIX)
            .tempdir()?;
        #[allow(deprecated)]
        let path = dir.into_path();
        Ok(Self { path })
    }

    /// Take ownership of an existing directory.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn socket_path(&self) -> PathBuf {
        self.path.join(tmpdir::SOCKET_NAME)
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let sock = self.socket_path();
        if let Err(e) = std::fs::remove_file(&sock)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            teardown_event!(warn, path = %sock.display(), error = %e, "Failed to remove appliance socket");
        }

        if let Err(e) = std::fs::remove_dir(&self.path) {
            teardown_event!(warn, path = %self.path.display(), error = %e, "Failed to remove session temp directory");
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionResources {
    console: [Option<OwnedFd>; CONSOLE_SLOTS],
    sock: Option<OwnedFd>,
    pid: Option<Pid>,
    recovery_pid: Option<Pid>,
    tmpdir: Option<TempDirGuard>,
    cmdline: Vec<String>,
}

impl SessionResources {
    pub(crate) fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub(crate) fn close_descriptors(&mut self, id: HandleId) {
        let mut closed = 0;
        for slot in self.console.iter_mut().chain(std::iter::once(&mut self.sock)) {
            if slot.take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            teardown_event!(debug, handle_id = %id, closed, "closed session descriptors");
        }
    }

    /// Reap the main subprocess, then the recovery process.
    pub(crate) fn wait_subprocesses(&mut self, id: HandleId) {
        for (role, pid) in [("appliance", self.pid.take()), ("recovery", self.recovery_pid.take())] {
            let Some(pid) = pid else { continue };
            match wait_for_exit(pid) {
                Ok(status) => {
                    teardown_event!(debug, handle_id = %id, pid = pid.as_raw(), role, ?status, "reaped subprocess");
                }
                Err(GuestkitError::Os(Errno::ECHILD)) => {
                    teardown_event!(debug, handle_id = %id, pid = pid.as_raw(), role, "subprocess already reaped");
                }
                Err(e) => {
                    teardown_event!(warn, handle_id = %id, pid = pid.as_raw(), role, error = %e, "Failed to reap subprocess");
                }
            }
        }
    }

    pub(crate) fn release_tmpdir(&mut self) {
        drop(self.tmpdir.take());
    }

    pub(crate) fn release_cmdline(&mut self) {
        self.cmdline = Vec::new();
    }

    /// True once nothing is held.
    pub(crate) fn is_released(&self) -> bool {
        self.console.iter().all(Option::is_none)
            && self.sock.is_none()
            && self.pid.is_none()
            && self.recovery_pid.is_none()
            && self.tmpdir.is_none()
            && self.cmdline.is_empty()
    }
}

impl Session {
    // ========================================================================
    // Descriptors
    // ========================================================================

    /// Install a console/control pipe end in slot 0 or 1, closing any
    /// descriptor already there.
    pub fn set_console_fd(&mut self, slot: usize, fd: OwnedFd) -> GuestkitResult<()> {
        self.ensure_open("set_console_fd")?;
        let Some(entry) = self.resources.console.get_mut(slot) else {
            return Err(GuestkitError::Internal(format!(
                "console slot {} out of range (0..{})",
                slot, CONSOLE_SLOTS
            )));
        };
        *entry = Some(fd);
        Ok(())
    }

    pub fn console_fd(&self, slot: usize) -> Option<RawFd> {
        self.resources
            .console
            .get(slot)?
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    pub fn take_console_fd(&mut self, slot: usize) -> Option<OwnedFd> {
        self.resources.console.get_mut(slot)?.take()
    }

    /// Install the RPC socket, closing any previous one.
    pub fn set_socket(&mut self, fd: OwnedFd) -> GuestkitResult<()> {
        self.ensure_open("set_socket")?;
        self.resources.sock = Some(fd);
        Ok(())
    }

    pub fn socket_fd(&self) -> Option<RawFd> {
        self.resources.sock.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Detach the RPC socket, e.g. after the protocol layer saw it break.
    pub fn take_socket(&mut self) -> Option<OwnedFd> {
        self.resources.sock.take()
    }

    // ========================================================================
    // Subprocesses
    // ========================================================================

    /// Record the appliance subprocess. Non-positive ids clear it.
    pub fn set_pid(&mut self, pid: i32) -> GuestkitResult<()> {
        self.ensure_open("set_pid")?;
        self.resources.pid = (pid > 0).then(|| Pid::from_raw(pid));
        Ok(())
    }

    /// The appliance subprocess id.
    ///
    /// # Errors
    ///
    /// Returns [`GuestkitError::NoSubprocess`] and reports it on the error
    /// channel if no subprocess is running.
    pub fn pid(&mut self) -> GuestkitResult<i32> {
        match self.resources.pid {
            Some(pid) => Ok(pid.as_raw()),
            None => {
                let msg = "get_pid: no appliance subprocess";
                self.error(format_args!("{}", msg));
                Err(GuestkitError::NoSubprocess(msg.to_string()))
            }
        }
    }

    /// The appliance subprocess id, if any, without reporting its absence.
    pub fn subprocess_pid(&self) -> Option<i32> {
        self.resources.pid.map(Pid::as_raw)
    }

    /// True while the recorded appliance subprocess still exists.
    pub fn subprocess_running(&self) -> bool {
        self.subprocess_pid().is_some_and(is_process_alive)
    }

    /// Record the recovery process. Non-positive ids clear it.
    pub fn set_recovery_pid(&mut self, pid: i32) -> GuestkitResult<()> {
        self.ensure_open("set_recovery_pid")?;
        self.resources.recovery_pid = (pid > 0).then(|| Pid::from_raw(pid));
        Ok(())
    }

    pub fn recovery_pid(&self) -> Option<i32> {
        self.resources.recovery_pid.map(Pid::as_raw)
    }

    // ========================================================================
    // Temp directory
    // ========================================================================

    /// Create the session temp directory if there is none yet.
    pub fn create_tmpdir(&mut self) -> GuestkitResult<&Path> {
        self.ensure_open("create_tmpdir")?;
        if self.resources.tmpdir.is_none() {
            match TempDirGuard::create() {
                Ok(guard) => {
                    tracing::debug!(handle_id = %self.id, path = %guard.path().display(), "created session temp directory");
                    self.resources.tmpdir = Some(guard);
                }
                Err(e) => {
                    self.error(format_args!("cannot create temporary directory: {}", e));
                    return Err(e);
                }
            }
        }
        self.tmpdir()
            .ok_or_else(|| GuestkitError::Internal("temp directory vanished".to_string()))
    }

    /// Hand a temp directory to the session, releasing any previous one.
    pub fn set_tmpdir(&mut self, guard: TempDirGuard) -> GuestkitResult<()> {
        self.ensure_open("set_tmpdir")?;
        self.resources.tmpdir = Some(guard);
        Ok(())
    }

    pub fn tmpdir(&self) -> Option<&Path> {
        self.resources.tmpdir.as_ref().map(TempDirGuard::path)
    }

    /// Where the appliance socket lives inside the temp directory.
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.resources.tmpdir.as_ref().map(TempDirGuard::socket_path)
    }

    // ========================================================================
    // Command line
    // ========================================================================

    pub fn set_cmdline(&mut self, cmdline: Vec<String>) -> GuestkitResult<()> {
        self.ensure_open("set_cmdline")?;
        self.resources.cmdline = cmdline;
        Ok(())
    }

    pub fn add_cmdline(&mut self, arg: &str) -> GuestkitResult<()> {
        self.ensure_open("add_cmdline")?;
        self.alloc.reserve(&mut self.resources.cmdline, 1);
        let arg = self.alloc.strdup(arg);
        self.resources.cmdline.push(arg);
        Ok(())
    }

    pub fn cmdline(&self) -> &[String] {
        &self.resources.cmdline
    }

    /// True once every descriptor, pid, temp directory and command line
    /// entry has been released.
    pub fn resources_released(&self) -> bool {
        self.resources.is_released()
    }
}
