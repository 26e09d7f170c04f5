//! Handle defaults and environment variable names.
//!
//! Centralized location for every value the handle core reads at creation
//! or relies on at teardown.

/// Environment variables consulted when a handle is created.
pub mod env {
    /// `1` enables verbose diagnostics.
    pub const DEBUG: &str = "GUESTKIT_DEBUG";

    /// `1` enables call tracing.
    pub const TRACE: &str = "GUESTKIT_TRACE";

    /// Search path for the appliance kernel and initrd.
    pub const PATH: &str = "GUESTKIT_PATH";

    /// Appliance hypervisor binary.
    pub const QEMU: &str = "GUESTKIT_QEMU";

    /// Extra kernel command line appended at launch.
    pub const APPEND: &str = "GUESTKIT_APPEND";

    /// Appliance memory size in megabytes. A plain decimal integer;
    /// suffixes like `512M` are rejected.
    pub const MEMSIZE: &str = "GUESTKIT_MEMSIZE";
}

/// Built-in handle defaults.
pub mod defaults {
    /// Appliance search path when `GUESTKIT_PATH` is unset.
    pub const PATH: &str = "/usr/lib/guestkit";

    /// Hypervisor binary when `GUESTKIT_QEMU` is unset.
    pub const QEMU: &str = "qemu-kvm";

    /// Appliance memory in megabytes when `GUESTKIT_MEMSIZE` is unset.
    pub const MEMSIZE_MB: i32 = 500;

    /// An explicit memory size must be strictly greater than this.
    pub const MEMSIZE_FLOOR_MB: i32 = 256;

    /// First protocol serial. Large so it stands out in captured traffic.
    pub const INITIAL_SERIAL: u32 = 0x0012_3400;
}

/// Session temp directory layout.
pub mod tmpdir {
    /// Prefix of the per-handle temp directory.
    pub const PREFIX: &str = "guestkit";

    /// Name of the RPC socket inside the temp directory.
    pub const SOCKET_NAME: &str = "sock";
}

/// Tag prefixed to diagnostics written to stderr.
pub const DIAGNOSTIC_TAG: &str = "guestkit";

/// Initial bucket count of the private data table.
pub const PRIVATE_TABLE_CAPACITY: usize = 16;

/// Bytes of a binary argument rendered by the trace helper.
pub const TRACE_BUFFER_LIMIT: usize = 256;
