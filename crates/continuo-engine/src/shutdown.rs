//! Cooperative shutdown.
//!
//! Termination signals and the last front-end's `exiting` notification both
//! set one process-wide exit flag. The audio callback becomes a no-op once
//! the flag is observed; the main thread then tears the audio stream down
//! before releasing plugin instances, so no block call is in flight during
//! release.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::engine::EngineShared;

static EXITING: AtomicBool = AtomicBool::new(false);

pub fn request_exit() {
    EXITING.store(true, Ordering::SeqCst);
}

pub fn is_exiting() -> bool {
    EXITING.load(Ordering::SeqCst)
}

/// Reset the flag; the host clears it right before entering its run loop.
pub fn clear_exit() {
    EXITING.store(false, Ordering::SeqCst);
}

/// Route INT/TERM/HUP/QUIT into the exit flag.
#[cfg(unix)]
pub fn install_signal_handlers() {
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT] {
            libc::signal(
                sig,
                handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }
    }
}

#[cfg(not(unix))]
pub fn install_signal_handlers() {}

#[cfg(unix)]
extern "C" fn handle_signal(_sig: libc::c_int) {
    // Only async-signal-safe work here.
    EXITING.store(true, Ordering::SeqCst);
}

/// Deactivate (if still active) and release every instance, exactly once
/// each. Instances already deactivated by a front-end's `exiting` get only
/// the cleanup call.
pub fn release_instances(shared: &EngineShared) {
    for instance in &shared.instances {
        if !instance.inactive.swap(true) {
            instance.plugin.descriptor.deactivate(instance.handle);
        }
        instance.plugin.descriptor.cleanup(instance.handle);
    }
    info!("released {} plugin instance(s)", shared.instances.len());
}
