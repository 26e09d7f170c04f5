//! guestkit - session handle core for a disk-image inspection appliance.
//!
//! A [`Handle`] owns everything that touches one appliance session: its
//! configuration, state, subprocess ids, descriptors, temp directory,
//! callbacks and private extension data. The launch sequence and the wire
//! protocol are built on top of [`Session`]; this crate makes sure whatever
//! they set up is released exactly once, whether the handle is closed,
//! dropped, or still alive at process exit.

pub mod appliance;
pub mod handle;
pub mod logging;
pub mod memory;
pub mod private_data;
pub mod registry;
pub mod trace;
pub(crate) mod util;

pub use appliance::{ApplianceOps, ProcessAppliance};
pub use guestkit_shared::{GuestkitError, GuestkitResult};
pub use handle::{
    CloseCallback, ErrorHandler, Handle, HandleConfig, HandleId, HandleOptions,
    LaunchDoneCallback, LogMessageCallback, Progress, ProgressCallback, Session, SessionState,
    SubprocessQuitCallback, TempDirGuard,
};
pub use logging::init_logging;
pub use memory::{Allocator, OutOfMemoryHandler};
pub use private_data::PrivateData;
pub use registry::Registry;
pub use trace::{render_buffer_in, write_buffer_in};

/// Library version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub release: u64,
    pub extra: String,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.release, self.extra)
    }
}

/// Version of this build.
pub fn version() -> Version {
    let pre = env!("CARGO_PKG_VERSION_PRE");
    Version {
        major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        release: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        extra: if pre.is_empty() {
            String::new()
        } else {
            format!("-{}", pre)
        },
    }
}

impl Handle {
    /// See [`version`].
    pub fn version() -> Version {
        version()
    }
}
