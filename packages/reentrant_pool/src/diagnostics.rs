//! One-time diagnostic output.

use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::{Context, PoolConfig};

/// Fires at most once, no matter how many threads race to fire it.
#[derive(Debug)]
pub(crate) struct OnceLatch {
    fired: AtomicBool,
}

impl OnceLatch {
    pub(crate) const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` for exactly one caller over the lifetime of the latch.
    pub(crate) fn try_fire(&self) -> bool {
        // Relaxed is enough: the latch guards only its own flag, nothing is published through it.
        self.fired
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

static SETTINGS_LOGGED: OnceLatch = OnceLatch::new();

/// Emits the active provider configuration, once per process.
///
/// Only the first provider to be used with settings logging enabled gets its configuration
/// dumped. Providers with logging disabled do not consume the latch.
#[cfg_attr(test, mutants::skip)] // Log output is verified by the settings_dump integration test.
pub(crate) fn log_settings_once<C: Context>(config: &PoolConfig) {
    if !config.log_settings() || !SETTINGS_LOGGED.try_fire() {
        return;
    }

    info!(
        target: "reentrant_pool::settings",
        context_type = type_name::<C>(),
        backing = %config.backing(),
        retention = %config.retention(),
        initial_capacity = config.sizing().initial_capacity(),
        capacity_increment = config.sizing().capacity_increment(),
        max_affinity_depth = config.max_affinity_depth().get(),
        minimal_idle_timeout = ?config.minimal_idle_timeout(),
        sweep_interval = ?config.sweep_interval(),
        "context provider settings"
    );
}
