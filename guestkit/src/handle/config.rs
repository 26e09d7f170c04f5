//! Handle configuration and its environment-derived defaults.

use guestkit_shared::constants::{defaults, env};
use guestkit_shared::{GuestkitError, GuestkitResult};

/// Settings read by the launch sequence to build the appliance invocation.
///
/// Set once at creation from the environment, then adjustable through the
/// session accessors while the handle is in `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleConfig {
    pub verbose: bool,
    pub trace: bool,
    /// Unmount and sync the appliance filesystems on close.
    pub autosync: bool,
    /// Search path for the appliance kernel and initrd.
    pub path: String,
    /// Hypervisor binary.
    pub qemu: String,
    /// Extra kernel command line.
    pub append: Option<String>,
    /// Appliance memory in megabytes.
    pub memsize: i32,
    pub selinux: bool,
    /// Connect the appliance console directly to the caller's stdio.
    pub direct: bool,
    /// Start the companion recovery process alongside the appliance.
    pub recovery_proc: bool,
    pub network: bool,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            trace: false,
            autosync: false,
            path: defaults::PATH.to_string(),
            qemu: defaults::QEMU.to_string(),
            append: None,
            memsize: defaults::MEMSIZE_MB,
            selinux: false,
            direct: false,
            recovery_proc: true,
            network: false,
        }
    }
}

impl HandleConfig {
    /// Build a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`GuestkitError::Config`] if `GUESTKIT_MEMSIZE` is set but is
    /// not a decimal integer greater than 256.
    pub fn from_env() -> GuestkitResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> GuestkitResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let flag = |name: &str| lookup(name).is_some_and(|value| value == "1");

        let memsize = match lookup(env::MEMSIZE) {
            Some(value) => parse_memsize(&value)?,
            None => base.memsize,
        };

        Ok(Self {
            verbose: flag(env::DEBUG),
            trace: flag(env::TRACE),
            path: lookup(env::PATH).unwrap_or(base.path),
            qemu: lookup(env::QEMU).unwrap_or(base.qemu),
            append: lookup(env::APPEND),
            memsize,
            ..base
        })
    }
}

/// Parse an explicit appliance memory size in megabytes.
///
/// The value must be a plain decimal integer, optionally surrounded by
/// whitespace, and strictly greater than
/// [`MEMSIZE_FLOOR_MB`](defaults::MEMSIZE_FLOOR_MB). Unit suffixes such as
/// `512M` and trailing garbage are rejected rather than truncated.
pub fn parse_memsize(value: &str) -> GuestkitResult<i32> {
    match value.trim().parse::<i32>() {
        Ok(memsize) if memsize > defaults::MEMSIZE_FLOOR_MB => Ok(memsize),
        _ => Err(GuestkitError::Config(format!(
            "non-numeric or too small value for {}: {:?}",
            env::MEMSIZE,
            value
        ))),
    }
}
