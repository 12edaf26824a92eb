//! Cooperative cancellation.
//!
//! The binary installs SIGINT/SIGTERM handlers that flip a process-wide
//! flag. Long-running loops (the merge-lock poll, the gate chain) check the
//! flag between steps and unwind through the normal error path, so held
//! locks release and snapshots restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

static INTERRUPTED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

/// Install signal handlers. Call once from `main`; a failure to register is
/// logged and ignored (the process still works, it just can't cancel
/// gracefully).
pub fn install() {
    #[cfg(unix)]
    {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&INTERRUPTED)) {
                log::warn!("could not register signal handler: {e}");
            }
        }
    }
}

/// Whether a cancellation signal has arrived.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Error out if a cancellation signal has arrived.
pub fn check() -> anyhow::Result<()> {
    if interrupted() {
        anyhow::bail!("interrupted");
    }
    Ok(())
}
