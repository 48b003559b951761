//! Process-wide shutdown signal wiring.
//!
//! SIGINT triggers graceful shutdown via `ctrlc`'s `set_handler` pattern
//! (store `true` into a shared stop flag). SIGPIPE is ignored through
//! `libc` so a write to a client that has disconnected surfaces as an
//! `EPIPE` `io::Error` instead of terminating the process — writes to IPC
//! client sockets would otherwise raise it constantly as clients come and
//! go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Ignore `SIGPIPE`, restoring the default-handler-free Rust runtime
/// behavior of returning `EPIPE` from the failing write instead of
/// terminating the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Install a SIGINT handler that stores `true` (stop-requested) into every
/// flag in `flags` — the same polarity `TaskManager::stop_handle` and
/// `IpcServer::stop_handle` already use. Returns an error if a handler is
/// already installed (see `ctrlc`'s single-registration contract).
pub fn install_sigint_handler(flags: Vec<Arc<AtomicBool>>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("SIGINT received, shutting down");
        for flag in &flags {
            flag.store(true, Ordering::SeqCst);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_sigpipe_does_not_panic() {
        ignore_sigpipe();
    }
}
