//! Appliance operations consumed during close.
//!
//! The launch sequence and the protocol layer live outside this crate.
//! Close only needs four things from them, expressed by [`ApplianceOps`].

use guestkit_shared::GuestkitResult;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::handle::Session;
use crate::logging::teardown_event;
use crate::util::process::signal_process;

/// Teardown operations on a running appliance.
///
/// Close calls these in a fixed order: `free_inspect_info`, then
/// `umount_all` and `sync` when autosync applies, then `kill_subprocess`
/// once the session has left `Config`. Failures are logged by close and
/// never stop teardown.
pub trait ApplianceOps: Send {
    /// Drop any cached inspection results.
    fn free_inspect_info(&mut self, _session: &mut Session) {}

    /// Unmount every filesystem mounted in the appliance.
    fn umount_all(&mut self, _session: &mut Session) -> GuestkitResult<()> {
        Ok(())
    }

    /// Flush the appliance's disks.
    fn sync(&mut self, _session: &mut Session) -> GuestkitResult<()> {
        Ok(())
    }

    /// Terminate the appliance subprocess and its recovery process.
    ///
    /// The default sends `SIGTERM` to the appliance and `SIGKILL` to the
    /// recovery process. Reaping is left to close.
    fn kill_subprocess(&mut self, session: &mut Session) -> GuestkitResult<()> {
        let mut result = Ok(());
        if let Some(pid) = session.subprocess_pid() {
            teardown_event!(debug, handle_id = %session.id(), pid, "sending SIGTERM to appliance");
            result = signal_process(Pid::from_raw(pid), Signal::SIGTERM);
        }
        if let Some(pid) = session.recovery_pid() {
            teardown_event!(debug, handle_id = %session.id(), pid, "sending SIGKILL to recovery process");
            // The recovery process is killed even if the appliance could not be.
            let killed = signal_process(Pid::from_raw(pid), Signal::SIGKILL);
            result = result.and(killed);
        }
        result
    }
}

/// Appliance driven as a plain child process.
///
/// Keeps no inspection cache and has nothing to unmount or flush on the host
/// side; termination is by signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessAppliance;

impl ApplianceOps for ProcessAppliance {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, HandleOptions};
    use crate::registry::Registry;
    use crate::util::process::wait_for_exit;
    use nix::sys::wait::WaitStatus;
    use std::process::Command;

    fn handle() -> Handle {
        let registry: &'static Registry = Box::leak(Box::new(Registry::new()));
        Handle::create_with(HandleOptions::default_in(registry)).unwrap()
    }

    #[test]
    fn test_kill_subprocess_signals_both() {
        let handle = handle();
        let main = Command::new("sleep").arg("30").spawn().unwrap();
        let recovery = Command::new("sleep").arg("30").spawn().unwrap();
        let main_pid = Pid::from_raw(main.id() as i32);
        let recovery_pid = Pid::from_raw(recovery.id() as i32);
        {
            let mut session = handle.lock();
            session.set_pid(main_pid.as_raw()).unwrap();
            session.set_recovery_pid(recovery_pid.as_raw()).unwrap();
            ProcessAppliance.kill_subprocess(&mut session).unwrap();
            session.set_pid(0).unwrap();
            session.set_recovery_pid(0).unwrap();
        }

        assert_eq!(
            wait_for_exit(main_pid).unwrap(),
            WaitStatus::Signaled(main_pid, Signal::SIGTERM, false)
        );
        assert_eq!(
            wait_for_exit(recovery_pid).unwrap(),
            WaitStatus::Signaled(recovery_pid, Signal::SIGKILL, false)
        );
    }

    #[test]
    fn test_defaults_without_subprocess() {
        let handle = handle();
        let mut session = handle.lock();
        let mut ops = ProcessAppliance;

        ops.free_inspect_info(&mut session);
        ops.umount_all(&mut session).unwrap();
        ops.sync(&mut session).unwrap();
        ops.kill_subprocess(&mut session).unwrap();
    }
}
