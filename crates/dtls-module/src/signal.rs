//! SIGINT/SIGTERM → cancellation.
//!
//! The handler only flips the process-wide shutdown token. It is installed
//! without `SA_RESTART`, so a signal arriving while the server is blocked in
//! `poll(2)` makes it return `EINTR`; the loop then sees the token at the top
//! of its next cycle and shuts down.

use std::io;
use std::sync::OnceLock;

use dtls_core::cancel::CancellationToken;
use dtls_core::error::{Result, ServerError};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

static SHUTDOWN: OnceLock<CancellationToken> = OnceLock::new();

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    // Async-signal-safe: a lock-free load and one atomic store.
    if let Some(token) = SHUTDOWN.get() {
        token.cancel();
    }
}

/// Route SIGINT and SIGTERM to `token`.
///
/// May be called once per process.
pub fn install(token: &CancellationToken) -> Result<()> {
    if SHUTDOWN.set(token.clone()).is_err() {
        return Err(ServerError::Signal(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "shutdown handler already installed",
        )));
    }

    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only touches an initialized OnceLock and atomics.
        unsafe { sigaction(signal, &action) }.map_err(|e| ServerError::Signal(e.into()))?;
        debug!(?signal, "shutdown handler installed");
    }
    Ok(())
}
