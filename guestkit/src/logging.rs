//! Diagnostic output setup.
//!
//! Library code only emits `tracing` events. Embedders that already install a
//! subscriber keep theirs; [`init_logging`] is for everyone else, and is what a
//! verbose handle calls on creation.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INITIALIZED: OnceLock<()> = OnceLock::new();
static EXITING: AtomicBool = AtomicBool::new(false);

/// Record that the process is running its exit hooks.
///
/// Subscribers may keep per-thread state that is already destroyed by then,
/// so events on the teardown path are suppressed from this point on.
pub(crate) fn mark_exiting() {
    EXITING.store(true, Ordering::SeqCst);
}

pub(crate) fn is_exiting() -> bool {
    EXITING.load(Ordering::SeqCst)
}

/// `tracing` event that is skipped once the process is exiting.
///
/// Used on every path the exit sweep can reach.
macro_rules! teardown_event {
    ($level:ident, $($arg:tt)+) => {
        if !$crate::logging::is_exiting() {
            ::tracing::$level!($($arg)+);
        }
    };
}

pub(crate) use teardown_event;

/// Install a stderr subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` the filter is `guestkit=info`, or `guestkit=debug` when
/// `verbose` is set. Only the first call has any effect, and nothing happens
/// if another global subscriber is already installed.
pub fn init_logging(verbose: bool) {
    INITIALIZED.get_or_init(|| {
        let filter = if verbose {
            "guestkit=debug"
        } else {
            "guestkit=info"
        };

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    });
}
