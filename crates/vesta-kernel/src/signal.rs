//! SIGINT wiring.
//!
//! Ctrl-C (or `kill -INT` from the frontend) trips the kernel's abort handle
//! so the running snippet fails with `KeyboardInterrupt` instead of the
//! process dying.

use std::sync::OnceLock;

use vesta_core::AbortHandle;

/// Handle tripped by the signal handler. Set once at startup.
static ABORT: OnceLock<AbortHandle> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(handle) = ABORT.get() {
        handle.abort();
    }
}

/// Install the SIGINT handler for `handle`.
#[cfg(unix)]
pub fn install(handle: AbortHandle) {
    if ABORT.set(handle).is_err() {
        tracing::warn!("SIGINT handler already installed");
        return;
    }

    let handler = on_sigint as extern "C" fn(libc::c_int);
    // SAFETY: the handler only reads a OnceLock that is already set and
    // stores to an atomic, both async-signal-safe.
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        tracing::warn!("Failed to install SIGINT handler");
    } else {
        tracing::debug!("SIGINT handler installed");
    }
}

#[cfg(not(unix))]
pub fn install(handle: AbortHandle) {
    let _ = ABORT.set(handle);
    tracing::debug!("SIGINT interruption is not supported on this platform");
}
