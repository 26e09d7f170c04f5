//! Per-handle error reporting.
//!
//! Every reported error is rendered once, handed to the handle's error
//! handler and kept as the handle's last error until the next one replaces
//! it.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use guestkit_shared::constants::DIAGNOSTIC_TAG;

use super::session::Session;
use super::state::SessionState;
use crate::logging::teardown_event;

/// Receives every error reported on a handle.
pub type ErrorHandler = Arc<dyn Fn(&Session, &str) + Send + Sync>;

/// The handler new handles start with: one line on stderr.
pub fn default_error_handler() -> ErrorHandler {
    error_handler_to(|| io::stderr().lock())
}

/// A handler that writes each error with [`write_error_line`] to a writer
/// obtained from `make_writer` at report time.
pub fn error_handler_to<F, W>(make_writer: F) -> ErrorHandler
where
    F: Fn() -> W + Send + Sync + 'static,
    W: Write,
{
    Arc::new(move |_: &Session, msg: &str| {
        let _ = write_error_line(&mut make_writer(), msg);
    })
}

/// Write `guestkit: error: <msg>` followed by a newline.
pub fn write_error_line<W: Write>(out: &mut W, msg: &str) -> io::Result<()> {
    writeln!(out, "{}: error: {}", DIAGNOSTIC_TAG, msg)
}

pub(crate) struct ErrorChannel {
    handler: Option<ErrorHandler>,
    last_error: Option<String>,
}

impl ErrorChannel {
    pub(crate) fn new() -> Self {
        Self {
            handler: Some(default_error_handler()),
            last_error: None,
        }
    }

    pub(crate) fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}

impl Session {
    /// Report an error on this handle.
    ///
    /// Prefer the [`guest_error!`](crate::guest_error) macro.
    pub fn error(&mut self, args: fmt::Arguments<'_>) {
        let mut msg = String::new();
        if fmt::write(&mut msg, args).is_err() {
            return;
        }
        self.report(msg);
    }

    /// Like [`Session::error`], with `": "` and the description of the
    /// current OS error appended.
    pub fn perror(&mut self, args: fmt::Arguments<'_>) {
        // Capture before formatting can clobber it.
        let errno = nix::errno::Errno::last();

        let mut msg = String::new();
        if fmt::write(&mut msg, args).is_err() {
            return;
        }
        msg.push_str(": ");
        msg.push_str(errno.desc());
        self.report(msg);
    }

    fn report(&mut self, msg: String) {
        if self.state == SessionState::NoHandle {
            // Nothing to hand it to and nowhere to keep it.
            let _ = write_error_line(&mut io::stderr().lock(), &msg);
            return;
        }
        teardown_event!(debug, handle_id = %self.id, error = %msg, "handle error");
        if let Some(handler) = self.errors.handler.clone() {
            handler(self, &msg);
        }
        self.errors.last_error = Some(msg);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last_error.as_deref()
    }

    pub fn clear_last_error(&mut self) {
        self.errors.clear_last_error();
    }

    /// Replace the error handler. `None` silences reporting; the last error
    /// is still recorded.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        if self.refuse_closed("set_error_handler") {
            return;
        }
        self.errors.handler = handler;
    }

    pub fn error_handler(&self) -> Option<ErrorHandler> {
        self.errors.handler.clone()
    }
}

/// Report a formatted error on a session.
///
/// ```rust,no_run
/// # let handle = guestkit::Handle::create()?;
/// let mut session = handle.lock();
/// guestkit::guest_error!(session, "bad value: {}", 42);
/// # Ok::<(), guestkit::GuestkitError>(())
/// ```
#[macro_export]
macro_rules! guest_error {
    ($session:expr, $($arg:tt)*) => {
        $session.error(::std::format_args!($($arg)*))
    };
}

/// Report a formatted error with the current OS error appended.
#[macro_export]
macro_rules! guest_perror {
    ($session:expr, $($arg:tt)*) => {
        $session.perror(::std::format_args!($($arg)*))
    };
}
