//! Handle - one session with the appliance.
//!
//! ## Architecture
//!
//! - `config`: settings and environment-derived defaults
//! - `state`: session state machine
//! - `session`: the owned session state and its accessors
//! - `error_channel`: last-error string and error handler
//! - `callbacks`: event callback slots and emitters
//! - `resources`: descriptors, subprocess ids, temp directory, command line
//! - `lifecycle`: create and close
//!
//! A [`Handle`] is what callers hold. It owns the session through an
//! `Arc<Mutex<_>>` so the exit-time sweep in [`crate::registry`] can still
//! reach a handle the caller leaked.

mod callbacks;
mod config;
mod error_channel;
mod lifecycle;
mod resources;
mod session;
mod state;

pub use callbacks::{
    CloseCallback, LaunchDoneCallback, LogMessageCallback, Progress, ProgressCallback,
    SubprocessQuitCallback,
};
pub use config::{HandleConfig, parse_memsize};
pub use error_channel::{ErrorHandler, default_error_handler, error_handler_to, write_error_line};
pub use resources::TempDirGuard;
pub use session::Session;
pub use state::SessionState;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use guestkit_shared::GuestkitResult;
use parking_lot::{Mutex, MutexGuard};

use crate::logging::teardown_event;
use crate::registry::Registry;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for [`Handle::create_with`].
#[derive(Default)]
pub struct HandleOptions {
    /// Explicit configuration. `None` reads it from the environment.
    pub config: Option<HandleConfig>,
    /// Registry to join. `None` uses [`Registry::global`].
    pub registry: Option<&'static Registry>,
}

impl HandleOptions {
    /// Use `config` as-is, ignoring the environment.
    pub fn with_config(config: HandleConfig) -> Self {
        Self {
            config: Some(config),
            registry: None,
        }
    }

    /// Built-in defaults in a standalone registry.
    pub fn default_in(registry: &'static Registry) -> Self {
        Self {
            config: Some(HandleConfig::default()),
            registry: Some(registry),
        }
    }

    pub fn registry(mut self, registry: &'static Registry) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// A session with the appliance.
///
/// Created in [`SessionState::Config`]; the launch sequence moves it to
/// `Ready`. Closing releases every resource the session owns. Dropping a
/// live handle closes it.
///
/// # Example
///
/// ```rust,no_run
/// use guestkit::Handle;
///
/// let handle = Handle::create()?;
/// handle.lock().set_memsize(1024);
/// // ... launch and drive the appliance ...
/// handle.close();
/// # Ok::<(), guestkit::GuestkitError>(())
/// ```
pub struct Handle {
    id: HandleId,
    inner: Arc<Mutex<Session>>,
}

impl Handle {
    /// Create a handle configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an environment override is invalid.
    /// Nothing is registered in that case.
    pub fn create() -> GuestkitResult<Self> {
        Self::create_with(HandleOptions::default())
    }

    pub fn create_with(options: HandleOptions) -> GuestkitResult<Self> {
        lifecycle::create(options)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Lock the session for reading or changing it.
    ///
    /// Callbacks run with this lock held; they receive the session directly
    /// and must not lock the handle again.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    pub fn is_closed(&self) -> bool {
        !self.state().is_live()
    }

    /// Tear the session down.
    ///
    /// The first call on a live handle performs the full teardown. Later
    /// calls only print a diagnostic.
    pub fn close(&self) {
        self.inner.lock().close();
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let mut session = self.inner.lock();
        if session.state().is_live() {
            teardown_event!(debug, handle_id = %self.id, "handle dropped while live, closing");
            session.close();
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

// Handles are handed to other threads; sessions are not shared between them.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Handle>;
};
