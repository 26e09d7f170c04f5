//! Handle creation and teardown.

use std::io::Write;
use std::sync::Arc;

use guestkit_shared::GuestkitResult;
use guestkit_shared::constants::DIAGNOSTIC_TAG;
use parking_lot::Mutex;

use super::config::HandleConfig;
use super::session::Session;
use super::state::SessionState;
use super::{Handle, HandleId, HandleOptions};
use crate::logging::teardown_event;
use crate::registry::Registry;

pub(super) fn create(options: HandleOptions) -> GuestkitResult<Handle> {
    let HandleOptions { config, registry } = options;

    let config = match config {
        Some(config) => config,
        None => HandleConfig::from_env().inspect_err(|e| {
            tracing::warn!(error = %e, "rejected handle configuration from environment");
        })?,
    };
    let registry = registry.unwrap_or_else(Registry::global);

    let id = HandleId::next();
    let verbose = config.verbose;
    let inner = Arc::new(Mutex::new(Session::new(id, config, registry)));
    registry.register(id, &inner);

    if verbose {
        crate::logging::init_logging(true);
        tracing::info!(handle_id = %id, "new guestkit handle {}", id);
    }

    Ok(Handle { id, inner })
}

impl Session {
    /// Tear the session down. See [`Handle::close`].
    pub(crate) fn close(&mut self) {
        close(self);
    }
}

/// Full teardown of a live session; a diagnostic only on a closed one.
///
/// Each step tolerates earlier ones having been skipped or having failed.
fn close(session: &mut Session) {
    let id = session.id;

    if session.state == SessionState::NoHandle {
        let _ = writeln!(
            std::io::stderr().lock(),
            "{}: close: called twice on the same handle",
            DIAGNOSTIC_TAG
        );
        teardown_event!(warn, handle_id = %id, "close called on an already closed handle");
        return;
    }

    if session.config.verbose {
        if crate::logging::is_exiting() {
            eprintln!(
                "{}: closing guestkit handle {} (state {})",
                DIAGNOSTIC_TAG, id, session.state
            );
        } else {
            tracing::info!(
                handle_id = %id,
                "closing guestkit handle {} (state {})",
                id,
                session.state
            );
        }
    }

    // The close callback sees the session exactly as the caller left it.
    session.emit_close();

    let mut ops = session.appliance.take();

    if let Some(ops) = ops.as_mut() {
        ops.free_inspect_info(session);

        if session.config.autosync && session.state == SessionState::Ready {
            if let Err(e) = ops.umount_all(session) {
                teardown_event!(warn, handle_id = %id, error = %e, "umount-all failed during close");
            }
            if let Err(e) = ops.sync(session) {
                teardown_event!(warn, handle_id = %id, error = %e, "sync failed during close");
            }
        }
    }

    // No more console output is delivered from here on.
    session.callbacks.log_message = None;

    if session.state != SessionState::Config
        && let Some(ops) = ops.as_mut()
        && let Err(e) = ops.kill_subprocess(session)
    {
        teardown_event!(warn, handle_id = %id, error = %e, "failed to terminate appliance subprocess");
    }
    drop(ops);

    session.resources.close_descriptors(id);
    session.resources.wait_subprocesses(id);
    session.resources.release_tmpdir();
    session.resources.release_cmdline();

    session.state = SessionState::NoHandle;

    // Already unlinked when reached from the exit sweep.
    session.registry.deregister(id);

    session.release_owned_data();
    teardown_event!(debug, handle_id = %id, "handle closed");
}
