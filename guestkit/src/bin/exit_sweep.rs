//! Leak verbose handles and let the process exit.
//!
//! Each handle gets a session temp directory whose path is printed on its
//! own line. Nothing is closed explicitly; the exit hook has to do it.
//!
//! Usage: guestkit-exit-sweep [COUNT]

use std::io::{self, Write};

use guestkit::{GuestkitError, GuestkitResult, Handle, HandleConfig, HandleOptions};

const DEFAULT_HANDLES: usize = 2;

fn main() -> GuestkitResult<()> {
    let count = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .map_err(|_| GuestkitError::Config(format!("invalid handle count: {arg:?}")))?,
        None => DEFAULT_HANDLES,
    };

    guestkit::init_logging(true);

    let mut stdout = io::stdout().lock();
    for _ in 0..count {
        let config = HandleConfig {
            verbose: true,
            ..HandleConfig::default()
        };
        let handle = Handle::create_with(HandleOptions::with_config(config))?;
        {
            let mut session = handle.lock();
            let dir = session.create_tmpdir()?;
            writeln!(stdout, "{}", dir.display())?;
        }
        std::mem::forget(handle);
    }
    stdout.flush()?;

    Ok(())
}
