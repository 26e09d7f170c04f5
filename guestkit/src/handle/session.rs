//! Owned session state and configuration accessors.
//!
//! The launch sequence and the protocol layer work directly on a
//! [`Session`]: they read the configuration to build the appliance command
//! line, install descriptors and subprocess ids, drive the state machine and
//! draw message serials.

use std::io::{self, Write};
use std::sync::Arc;

use guestkit_shared::constants::{DIAGNOSTIC_TAG, defaults};
use guestkit_shared::{GuestkitError, GuestkitResult};

use super::HandleId;
use super::callbacks::Callbacks;
use super::config::HandleConfig;
use super::error_channel::ErrorChannel;
use super::resources::SessionResources;
use super::state::SessionState;
use crate::appliance::{ApplianceOps, ProcessAppliance};
use crate::memory::{Allocator, OutOfMemoryHandler};
use crate::private_data::PrivateData;
use crate::registry::Registry;

pub struct Session {
    pub(super) id: HandleId,
    pub(super) state: SessionState,
    pub(super) config: HandleConfig,
    pub(super) alloc: Allocator,
    pub(super) errors: ErrorChannel,
    pub(super) callbacks: Callbacks,
    pub(super) private: PrivateData,
    pub(super) resources: SessionResources,
    /// Taken out for the duration of close so operations can borrow the session.
    pub(super) appliance: Option<Box<dyn ApplianceOps>>,
    pub(super) registry: &'static Registry,
    next_serial: u32,
    appliance_help: Option<String>,
    appliance_version: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("pid", &self.resources.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(id: HandleId, config: HandleConfig, registry: &'static Registry) -> Self {
        Self {
            id,
            state: SessionState::Config,
            config,
            alloc: Allocator::new(),
            errors: ErrorChannel::new(),
            callbacks: Callbacks::default(),
            private: PrivateData::new(),
            resources: SessionResources::default(),
            appliance: Some(Box::new(ProcessAppliance)),
            registry,
            next_serial: defaults::INITIAL_SERIAL,
            appliance_help: None,
            appliance_version: None,
        }
    }

    // ========================================================================
    // Identity & state
    // ========================================================================

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_config(&self) -> bool {
        self.state == SessionState::Config
    }

    pub fn is_launching(&self) -> bool {
        self.state == SessionState::Launching
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// `Config` → `Launching`. Called by the launch sequence.
    pub fn begin_launch(&mut self) -> GuestkitResult<()> {
        self.transition(SessionState::Launching)
    }

    /// `Launching` → `Ready`. Called once the appliance has booted.
    pub fn mark_ready(&mut self) -> GuestkitResult<()> {
        self.transition(SessionState::Ready)
    }

    /// Back to `Config` after a failed launch or a subprocess exit.
    pub fn mark_config(&mut self) -> GuestkitResult<()> {
        self.transition(SessionState::Config)
    }

    fn transition(&mut self, next: SessionState) -> GuestkitResult<()> {
        if !self.state.can_transition_to(next) {
            let err = GuestkitError::InvalidState(format!(
                "cannot move handle from {} to {}",
                self.state, next
            ));
            self.error(format_args!("{}", err));
            return Err(err);
        }

        tracing::debug!(
            handle_id = %self.id,
            from = %self.state,
            to = %next,
            "session state change"
        );
        self.state = next;
        Ok(())
    }

    /// Take the next protocol message serial.
    pub fn next_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }

    /// The serial the next call to [`Session::next_serial`] will return.
    pub fn peek_serial(&self) -> u32 {
        self.next_serial
    }

    /// Print a diagnostic and return `true` if the session has been closed.
    ///
    /// A closed session has released its error channel, so the refusal goes
    /// straight to stderr.
    pub(super) fn refuse_closed(&self, op: &str) -> bool {
        if self.state != SessionState::NoHandle {
            return false;
        }
        let _ = writeln!(io::stderr().lock(), "{}: {}: handle is closed", DIAGNOSTIC_TAG, op);
        true
    }

    /// Fail with [`GuestkitError::InvalidState`] if the session has been closed.
    pub(super) fn ensure_open(&self, op: &str) -> GuestkitResult<()> {
        if self.state == SessionState::NoHandle {
            return Err(GuestkitError::InvalidState(format!("{}: handle is closed", op)));
        }
        Ok(())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    pub fn verbose(&self) -> bool {
        self.config.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        if self.refuse_closed("set_verbose") {
            return;
        }
        self.config.verbose = verbose;
    }

    pub fn autosync(&self) -> bool {
        self.config.autosync
    }

    pub fn set_autosync(&mut self, autosync: bool) {
        if self.refuse_closed("set_autosync") {
            return;
        }
        self.config.autosync = autosync;
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Set the appliance search path. `None` restores the built-in default.
    pub fn set_path(&mut self, path: Option<&str>) {
        if self.refuse_closed("set_path") {
            return;
        }
        self.config.path = self.alloc.strdup(path.unwrap_or(defaults::PATH));
    }

    pub fn qemu(&self) -> &str {
        &self.config.qemu
    }

    /// Set the hypervisor binary. `None` restores the built-in default.
    pub fn set_qemu(&mut self, qemu: Option<&str>) {
        if self.refuse_closed("set_qemu") {
            return;
        }
        self.config.qemu = self.alloc.strdup(qemu.unwrap_or(defaults::QEMU));
    }

    pub fn append(&self) -> Option<&str> {
        self.config.append.as_deref()
    }

    /// Set the extra kernel command line. `None` clears it.
    pub fn set_append(&mut self, append: Option<&str>) {
        if self.refuse_closed("set_append") {
            return;
        }
        self.config.append = append.map(|append| self.alloc.strdup(append));
    }

    pub fn memsize(&self) -> i32 {
        self.config.memsize
    }

    pub fn set_memsize(&mut self, memsize: i32) {
        if self.refuse_closed("set_memsize") {
            return;
        }
        self.config.memsize = memsize;
    }

    pub fn selinux(&self) -> bool {
        self.config.selinux
    }

    pub fn set_selinux(&mut self, selinux: bool) {
        if self.refuse_closed("set_selinux") {
            return;
        }
        self.config.selinux = selinux;
    }

    pub fn trace(&self) -> bool {
        self.config.trace
    }

    pub fn set_trace(&mut self, trace: bool) {
        if self.refuse_closed("set_trace") {
            return;
        }
        self.config.trace = trace;
    }

    pub fn direct(&self) -> bool {
        self.config.direct
    }

    pub fn set_direct(&mut self, direct: bool) {
        if self.refuse_closed("set_direct") {
            return;
        }
        self.config.direct = direct;
    }

    pub fn recovery_proc(&self) -> bool {
        self.config.recovery_proc
    }

    pub fn set_recovery_proc(&mut self, recovery_proc: bool) {
        if self.refuse_closed("set_recovery_proc") {
            return;
        }
        self.config.recovery_proc = recovery_proc;
    }

    pub fn network(&self) -> bool {
        self.config.network
    }

    pub fn set_network(&mut self, network: bool) {
        if self.refuse_closed("set_network") {
            return;
        }
        self.config.network = network;
    }

    /// Cached `-help` output of the hypervisor, filled in by the launch sequence.
    pub fn appliance_help(&self) -> Option<&str> {
        self.appliance_help.as_deref()
    }

    pub fn set_appliance_help(&mut self, help: Option<String>) {
        if self.refuse_closed("set_appliance_help") {
            return;
        }
        self.appliance_help = help;
    }

    /// Cached `-version` output of the hypervisor.
    pub fn appliance_version(&self) -> Option<&str> {
        self.appliance_version.as_deref()
    }

    pub fn set_appliance_version(&mut self, version: Option<String>) {
        if self.refuse_closed("set_appliance_version") {
            return;
        }
        self.appliance_version = version;
    }

    // ========================================================================
    // Allocation policy
    // ========================================================================

    /// Allocator bound to this session's out-of-memory handler.
    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    pub fn set_out_of_memory_handler(&mut self, handler: OutOfMemoryHandler) {
        if self.refuse_closed("set_out_of_memory_handler") {
            return;
        }
        self.alloc.set_out_of_memory_handler(handler);
    }

    pub fn out_of_memory_handler(&self) -> OutOfMemoryHandler {
        self.alloc.out_of_memory_handler()
    }

    // ========================================================================
    // Private data
    // ========================================================================

    /// Attach `value` under `key`. The session keeps only a weak reference.
    pub fn set_private<T>(&mut self, key: &str, value: &Arc<T>)
    where
        T: std::any::Any + Send + Sync,
    {
        if self.refuse_closed("set_private") {
            return;
        }
        self.private.set(&self.alloc, key, value);
    }

    pub fn get_private<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
    {
        self.private.get(key)
    }

    pub fn private_data(&self) -> &PrivateData {
        &self.private
    }

    // ========================================================================
    // External collaborators
    // ========================================================================

    /// Replace the operations close uses to tear the appliance down.
    pub fn set_appliance_ops(&mut self, ops: Box<dyn ApplianceOps>) {
        if self.refuse_closed("set_appliance_ops") {
            return;
        }
        self.appliance = Some(ops);
    }

    /// Release everything the session still owns after teardown.
    pub(super) fn release_owned_data(&mut self) {
        self.private.clear();
        self.errors.clear_last_error();
        self.callbacks = Callbacks::default();
        self.appliance = None;
        self.appliance_help = None;
        self.appliance_version = None;
        self.config.append = None;
        self.config.path.clear();
        self.config.path.shrink_to_fit();
        self.config.qemu.clear();
        self.config.qemu.shrink_to_fit();
    }
}
