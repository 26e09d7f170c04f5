//! Process-wide registry of live handles.
//!
//! Every handle is registered from the moment creation succeeds until close
//! completes. The first registration against the global registry installs
//! an exit hook that closes whatever is still registered when the process
//! terminates, so a forgotten handle still gets its subprocess reaped and
//! its temp directory removed.
//!
//! The registry lock guards the list only. A handle's own session is behind
//! its own mutex and is never locked while the registry lock is held.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once, OnceLock, Weak};

use guestkit_shared::constants::DIAGNOSTIC_TAG;
use parking_lot::Mutex;

use crate::handle::{HandleId, Session};
use crate::logging::{self, teardown_event};

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();
static EXIT_HOOK: Once = Once::new();

struct RegistryEntry {
    id: HandleId,
    session: Weak<Mutex<Session>>,
}

/// Tracked set of live handles, newest first.
pub struct Registry {
    entries: Mutex<Vec<RegistryEntry>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.len())
            .finish()
    }
}

impl Registry {
    /// Create an empty, standalone registry.
    ///
    /// Handles created against a standalone registry are not swept at exit;
    /// call [`Registry::close_all`] explicitly.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The registry every handle uses unless told otherwise.
    pub fn global() -> &'static Registry {
        GLOBAL_REGISTRY.get_or_init(Registry::new)
    }

    fn is_global(&self) -> bool {
        GLOBAL_REGISTRY
            .get()
            .is_some_and(|global| std::ptr::eq(global, self))
    }

    /// Insert a session at the head of the list.
    pub(crate) fn register(&self, id: HandleId, session: &Arc<Mutex<Session>>) {
        {
            let mut entries = self.entries.lock();
            entries.push(RegistryEntry {
                id,
                session: Arc::downgrade(session),
            });
            tracing::trace!(handle_id = %id, live = entries.len(), "registered handle");
        }

        if self.is_global() {
            install_exit_hook();
        }
    }

    /// Unlink a session. Returns `false` if it was not registered.
    pub(crate) fn deregister(&self, id: HandleId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().rposition(|entry| entry.id == id) {
            Some(index) => {
                entries.remove(index);
                teardown_event!(trace, handle_id = %id, live = entries.len(), "deregistered handle");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.lock().iter().any(|entry| entry.id == id)
    }

    /// Ids of every live handle, newest first.
    pub fn ids(&self) -> Vec<HandleId> {
        self.entries.lock().iter().rev().map(|entry| entry.id).collect()
    }

    /// Close every registered handle, newest first, until none remain.
    ///
    /// Each entry is unlinked before its session is closed, so a handle is
    /// never visited twice. A panic while closing one handle is reported and
    /// the sweep moves on to the next. Returns the number of handles closed.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        loop {
            let Some(entry) = self.entries.lock().pop() else {
                break;
            };

            let Some(session) = entry.session.upgrade() else {
                teardown_event!(debug, handle_id = %entry.id, "dropping stale registry entry");
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut session = session.lock();
                if session.state().is_live() {
                    session.close();
                    true
                } else {
                    false
                }
            }));

            match outcome {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(_) => {
                    let _ = writeln!(
                        io::stderr().lock(),
                        "{}: close: handle {} panicked during teardown",
                        DIAGNOSTIC_TAG,
                        entry.id
                    );
                }
            }
        }

        if closed > 0 {
            teardown_event!(debug, closed, "closed remaining handles");
        }
        closed
    }
}

fn install_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: `close_handles_at_exit` is a plain `extern "C"` function
        // with no arguments and never unwinds.
        let rc = unsafe { libc::atexit(close_handles_at_exit) };
        if rc != 0 {
            tracing::warn!("failed to install exit hook; live handles will not be closed at exit");
        }
    });
}

extern "C" fn close_handles_at_exit() {
    logging::mark_exiting();
    // `close_all` already contains panics per handle; this only guards the
    // registry access itself against unwinding into C.
    let _ = panic::catch_unwind(|| {
        if let Some(registry) = GLOBAL_REGISTRY.get() {
            registry.close_all();
        }
    });
}
