//! Event callback slots.
//!
//! Each slot holds at most one closure; setting a slot replaces whatever was
//! there. Closures carry their own captured state and receive the session
//! they fire for.

use std::sync::Arc;

use super::session::Session;

/// Called at the start of close, before any state is touched.
pub type CloseCallback = Arc<dyn Fn(&Session) + Send + Sync>;

/// Called when the appliance subprocess exits.
pub type SubprocessQuitCallback = Arc<dyn Fn(&Session) + Send + Sync>;

/// Called once the appliance has finished booting.
pub type LaunchDoneCallback = Arc<dyn Fn(&Session) + Send + Sync>;

/// Called with raw console output from the appliance.
pub type LogMessageCallback = Arc<dyn Fn(&Session, &[u8]) + Send + Sync>;

/// Called with progress notifications for long-running calls.
pub type ProgressCallback = Arc<dyn Fn(&Session, &Progress) + Send + Sync>;

/// A progress notification received from the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub proc_nr: i32,
    pub serial: u32,
    pub position: u64,
    pub total: u64,
}

#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub(crate) close: Option<CloseCallback>,
    pub(crate) log_message: Option<LogMessageCallback>,
    pub(crate) subprocess_quit: Option<SubprocessQuitCallback>,
    pub(crate) launch_done: Option<LaunchDoneCallback>,
    pub(crate) progress: Option<ProgressCallback>,
}

impl Session {
    pub fn set_close_callback(&mut self, cb: Option<CloseCallback>) {
        if self.refuse_closed("set_close_callback") {
            return;
        }
        self.callbacks.close = cb;
    }

    pub fn set_log_message_callback(&mut self, cb: Option<LogMessageCallback>) {
        if self.refuse_closed("set_log_message_callback") {
            return;
        }
        self.callbacks.log_message = cb;
    }

    pub fn set_subprocess_quit_callback(&mut self, cb: Option<SubprocessQuitCallback>) {
        if self.refuse_closed("set_subprocess_quit_callback") {
            return;
        }
        self.callbacks.subprocess_quit = cb;
    }

    pub fn set_launch_done_callback(&mut self, cb: Option<LaunchDoneCallback>) {
        if self.refuse_closed("set_launch_done_callback") {
            return;
        }
        self.callbacks.launch_done = cb;
    }

    pub fn set_progress_callback(&mut self, cb: Option<ProgressCallback>) {
        if self.refuse_closed("set_progress_callback") {
            return;
        }
        self.callbacks.progress = cb;
    }

    pub fn has_log_message_callback(&self) -> bool {
        self.callbacks.log_message.is_some()
    }

    pub fn emit_log_message(&self, buf: &[u8]) {
        if let Some(cb) = self.callbacks.log_message.clone() {
            cb(self, buf);
        }
    }

    pub fn emit_subprocess_quit(&self) {
        if let Some(cb) = self.callbacks.subprocess_quit.clone() {
            cb(self);
        }
    }

    pub fn emit_launch_done(&self) {
        if let Some(cb) = self.callbacks.launch_done.clone() {
            cb(self);
        }
    }

    pub fn emit_progress(&self, progress: &Progress) {
        if let Some(cb) = self.callbacks.progress.clone() {
            cb(self, progress);
        }
    }

    pub(super) fn emit_close(&self) {
        if let Some(cb) = self.callbacks.close.clone() {
            cb(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, HandleOptions};
    use crate::registry::Registry;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> Handle {
        let registry: &'static Registry = Box::leak(Box::new(Registry::new()));
        Handle::create_with(HandleOptions::default_in(registry)).unwrap()
    }

    #[test]
    fn test_emit_without_callback_is_noop() {
        let handle = handle();
        let session = handle.lock();
        session.emit_log_message(b"boot");
        session.emit_launch_done();
        session.emit_subprocess_quit();
        session.emit_progress(&Progress {
            proc_nr: 1,
            serial: 2,
            position: 0,
            total: 10,
        });
    }

    #[test]
    fn test_log_message_receives_bytes() {
        let handle = handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handle
            .lock()
            .set_log_message_callback(Some(Arc::new(move |_: &Session, buf: &[u8]| {
                sink.lock().extend_from_slice(buf);
            })));

        handle.lock().emit_log_message(b"kernel: ");
        handle.lock().emit_log_message(b"ok\n");

        assert_eq!(seen.lock().as_slice(), b"kernel: ok\n");
    }

    #[test]
    fn test_setting_replaces_previous() {
        let handle = handle();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        handle
            .lock()
            .set_launch_done_callback(Some(Arc::new(move |_: &Session| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        let counter = Arc::clone(&second);
        handle
            .lock()
            .set_launch_done_callback(Some(Arc::new(move |_: &Session| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));

        handle.lock().emit_launch_done();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_and_session_are_passed_through() {
        let handle = handle();
        let id = handle.id();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        handle
            .lock()
            .set_progress_callback(Some(Arc::new(move |session: &Session, p: &Progress| {
                *sink.lock() = Some((session.id(), *p));
            })));

        let progress = Progress {
            proc_nr: 7,
            serial: 0x0012_3400,
            position: 50,
            total: 100,
        };
        handle.lock().emit_progress(&progress);

        assert_eq!(*seen.lock(), Some((id, progress)));
    }

    #[test]
    fn test_clearing_a_slot() {
        let handle = handle();
        let quits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&quits);
        handle
            .lock()
            .set_subprocess_quit_callback(Some(Arc::new(move |_: &Session| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        handle.lock().set_subprocess_quit_callback(None);

        handle.lock().emit_subprocess_quit();

        assert_eq!(quits.load(Ordering::SeqCst), 0);
    }
}
