//! End-to-end handle lifecycle: creation, teardown of real OS resources,
//! the exit sweep and cross-thread use.

use std::io::Read;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use guestkit::{
    GuestkitError, Handle, HandleConfig, HandleOptions, Registry, Session, SessionState,
};

fn standalone() -> &'static Registry {
    Box::leak(Box::new(Registry::new()))
}

fn create_in(registry: &'static Registry) -> Handle {
    Handle::create_with(HandleOptions::default_in(registry)).unwrap()
}

fn quiet(handle: &Handle) {
    handle.lock().set_error_handler(None);
}

#[test]
fn test_memsize_from_environment() {
    let registry = standalone();

    // SAFETY: every other test in this binary passes an explicit config.
    unsafe { std::env::set_var("GUESTKIT_MEMSIZE", "128") };
    let err = Handle::create_with(HandleOptions::default().registry(registry)).unwrap_err();
    assert!(err.is_config());
    assert!(registry.is_empty());

    unsafe { std::env::set_var("GUESTKIT_MEMSIZE", "512") };
    let handle = Handle::create_with(HandleOptions::default().registry(registry)).unwrap();
    assert_eq!(handle.lock().memsize(), 512);
    assert_eq!(registry.len(), 1);

    unsafe { std::env::remove_var("GUESTKIT_MEMSIZE") };
}

#[test]
fn test_explicit_config_is_used_as_is() {
    let registry = standalone();
    let config = HandleConfig {
        qemu: "/opt/qemu/bin/qemu-system-x86_64".to_string(),
        memsize: 2048,
        network: true,
        ..HandleConfig::default()
    };

    let handle = Handle::create_with(HandleOptions::with_config(config).registry(registry)).unwrap();

    let session = handle.lock();
    assert_eq!(session.qemu(), "/opt/qemu/bin/qemu-system-x86_64");
    assert_eq!(session.memsize(), 2048);
    assert!(session.network());
    assert_eq!(session.path(), "/usr/lib/guestkit");
}

#[test]
fn test_string_setters_restore_defaults() {
    let handle = create_in(standalone());
    let mut session = handle.lock();

    session.set_path(Some("/srv/appliance"));
    session.set_qemu(Some("qemu-system-aarch64"));
    session.set_append(Some("console=ttyS0"));
    assert_eq!(session.path(), "/srv/appliance");
    assert_eq!(session.append(), Some("console=ttyS0"));

    session.set_path(None);
    session.set_qemu(None);
    session.set_append(None);
    assert_eq!(session.path(), "/usr/lib/guestkit");
    assert_eq!(session.qemu(), "qemu-kvm");
    assert_eq!(session.append(), None);
}

#[test]
fn test_full_teardown_releases_os_resources() {
    let registry = standalone();
    let handle = create_in(registry);

    let (console_read, console_write) = nix::unistd::pipe().unwrap();
    let (sock_read, sock_write) = nix::unistd::pipe().unwrap();
    let child = Command::new("sleep").arg("30").spawn().unwrap();
    let tmpdir = {
        let mut session = handle.lock();
        session.set_console_fd(1, console_write).unwrap();
        session.set_socket(sock_write).unwrap();
        session.set_pid(child.id() as i32).unwrap();
        let tmpdir = session.create_tmpdir().unwrap().to_path_buf();
        std::fs::write(session.socket_path().unwrap(), b"").unwrap();
        session.add_cmdline("qemu-kvm").unwrap();
        session.begin_launch().unwrap();
        session.mark_ready().unwrap();
        tmpdir
    };

    handle.close();

    let mut session = handle.lock();
    assert_eq!(session.state(), SessionState::NoHandle);
    assert!(session.resources_released());
    assert!(session.console_fd(1).is_none());
    assert!(session.socket_fd().is_none());
    assert!(session.tmpdir().is_none());
    assert!(!tmpdir.exists());
    assert!(!registry.contains(handle.id()));

    assert!(matches!(session.pid(), Err(GuestkitError::NoSubprocess(_))));
    assert!(session.last_error().is_none());
    drop(session);

    for read_end in [console_read, sock_read] {
        let mut buf = Vec::new();
        assert_eq!(std::fs::File::from(read_end).read_to_end(&mut buf).unwrap(), 0);
    }
}

#[test]
fn test_never_launched_handle_closes_cleanly() {
    let registry = standalone();
    let handle = create_in(registry);

    handle.close();

    assert!(handle.is_closed());
    assert!(registry.is_empty());
}

#[test]
fn test_double_close_leaves_registry_alone() {
    let registry = standalone();
    let a = create_in(registry);
    let b = create_in(registry);

    a.close();
    a.close();

    assert_eq!(registry.ids(), vec![b.id()]);
    assert_eq!(a.state(), SessionState::NoHandle);
}

#[test]
fn test_exit_sweep_closes_each_leaked_handle_once() {
    let registry = standalone();
    let closes = Arc::new(AtomicUsize::new(0));
    let mut tmpdirs = Vec::new();

    for _ in 0..4 {
        let handle = create_in(registry);
        let counter = Arc::clone(&closes);
        {
            let mut session = handle.lock();
            tmpdirs.push(session.create_tmpdir().unwrap().to_path_buf());
            session.set_close_callback(Some(Arc::new(move |_: &Session| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }
        std::mem::forget(handle);
    }

    assert_eq!(registry.close_all(), 4);
    assert_eq!(closes.load(Ordering::SeqCst), 4);
    assert!(registry.is_empty());
    assert!(tmpdirs.iter().all(|dir| !dir.exists()));
}

#[test]
fn test_closed_handle_refuses_every_mutator() {
    let registry = standalone();
    let handle = create_in(registry);
    handle.close();

    let (_console_read, console_write) = nix::unistd::pipe().unwrap();
    let (sock_read, sock_write) = nix::unistd::pipe().unwrap();
    #[allow(deprecated)]
    let adopted = tempfile::Builder::new()
        .prefix("guestkit")
        .tempdir()
        .unwrap()
        .into_path();
    let value = Arc::new(7u32);
    let fired = Arc::new(AtomicUsize::new(0));

    let mut session = handle.lock();
    let closed = |result: Result<(), GuestkitError>| {
        assert!(matches!(result, Err(GuestkitError::InvalidState(_))));
    };

    closed(session.set_console_fd(1, console_write));
    closed(session.set_socket(sock_write));
    closed(session.set_pid(std::process::id() as i32));
    closed(session.set_recovery_pid(std::process::id() as i32));
    closed(session.create_tmpdir().map(|_| ()));
    closed(session.set_tmpdir(guestkit::TempDirGuard::adopt(&adopted)));
    closed(session.set_cmdline(vec!["qemu-kvm".to_string()]));
    closed(session.add_cmdline("-nographic"));

    session.set_verbose(true);
    session.set_autosync(true);
    session.set_path(Some("/srv/appliance"));
    session.set_qemu(Some("qemu-system-aarch64"));
    session.set_append(Some("console=ttyS0"));
    session.set_memsize(4096);
    session.set_selinux(true);
    session.set_trace(true);
    session.set_direct(true);
    session.set_recovery_proc(false);
    session.set_network(true);
    session.set_appliance_help(Some("usage".into()));
    session.set_appliance_version(Some("9.0".into()));
    session.set_private("ext", &value);
    session.set_error_handler(None);
    session.set_appliance_ops(Box::new(guestkit::ProcessAppliance));
    let counter = Arc::clone(&fired);
    session.set_log_message_callback(Some(Arc::new(move |_: &Session, _: &[u8]| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    let counter = Arc::clone(&fired);
    session.set_launch_done_callback(Some(Arc::new(move |_: &Session| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    session.set_close_callback(Some(Arc::new(|_: &Session| {})));
    session.set_subprocess_quit_callback(Some(Arc::new(|_: &Session| {})));
    session.set_progress_callback(Some(Arc::new(|_: &Session, _: &guestkit::Progress| {})));
    guestkit::guest_error!(session, "after close");

    assert_eq!(session.state(), SessionState::NoHandle);
    assert!(session.resources_released());
    assert!(session.console_fd(1).is_none());
    assert!(session.socket_fd().is_none());
    assert!(session.tmpdir().is_none());
    assert!(session.cmdline().is_empty());
    assert!(session.path().is_empty());
    assert!(session.qemu().is_empty());
    assert!(session.append().is_none());
    assert!(session.appliance_help().is_none());
    assert!(session.appliance_version().is_none());
    assert!(!session.verbose());
    assert!(!session.private_data().is_initialized());
    assert!(session.error_handler().is_some());
    assert!(session.last_error().is_none());
    assert!(!session.has_log_message_callback());
    session.emit_log_message(b"late");
    session.emit_launch_done();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    drop(session);

    // Refused resources are released on the spot.
    assert!(!adopted.exists());
    let mut buf = Vec::new();
    assert_eq!(std::fs::File::from(sock_read).read_to_end(&mut buf).unwrap(), 0);

    // Closing again still only prints the double-close diagnostic.
    handle.close();
    assert!(registry.is_empty());
}

#[test]
fn test_error_channel_round_trip() {
    let handle = create_in(standalone());
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    handle
        .lock()
        .set_error_handler(Some(Arc::new(move |_: &Session, msg: &str| {
            assert_eq!(msg, "bad value: 42");
            counter.fetch_add(1, Ordering::SeqCst);
        })));

    guestkit::guest_error!(handle.lock(), "bad value: {}", 42);

    assert_eq!(handle.lock().last_error(), Some("bad value: 42"));
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[test]
fn test_illegal_transition_is_reported() {
    let handle = create_in(standalone());
    quiet(&handle);

    let err = handle.lock().mark_ready().unwrap_err();

    assert!(matches!(err, GuestkitError::InvalidState(_)));
    assert_eq!(handle.state(), SessionState::Config);
    assert!(handle.lock().last_error().is_some());
}

#[test]
fn test_private_data_across_handles() {
    let a = create_in(standalone());
    let b = create_in(standalone());
    let v1 = Arc::new(String::from("v1"));
    let v2 = Arc::new(String::from("v2"));

    assert!(a.lock().get_private::<String>("ext").is_none());
    a.lock().set_private("ext", &v1);
    a.lock().set_private("ext", &v2);

    assert_eq!(a.lock().get_private::<String>("ext").as_deref(), Some(&*v2));
    assert!(b.lock().get_private::<String>("ext").is_none());
}

#[test]
fn test_handles_on_separate_threads() {
    let registry = standalone();

    let ids: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(move || {
                let handle = create_in(registry);
                handle.lock().set_memsize(1024);
                let id = handle.id();
                handle.close();
                id
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
    assert!(registry.is_empty());
}

#[test]
fn test_handle_moves_between_threads() {
    let registry = standalone();
    let handle = create_in(registry);
    let id = handle.id();

    let worker = thread::spawn(move || {
        handle.lock().set_autosync(true);
        handle
    });
    let handle = worker.join().unwrap();

    assert!(handle.lock().autosync());
    drop(handle);
    assert!(!registry.contains(id));
}
