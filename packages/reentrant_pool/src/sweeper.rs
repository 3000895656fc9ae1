//! Optional background thread that runs periodic reclaim passes.

use std::any::type_name;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::provider::ProviderInner;
use crate::{Context, MemoryPressure};

/// Owns the sweeper thread. Dropping it stops and joins the thread.
pub(crate) struct Sweeper {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Starts a thread that runs a routine reclaim pass every `interval` for as long as the
    /// provider is alive and the sweeper is not dropped.
    pub(crate) fn spawn<C: Context>(provider: Weak<ProviderInner<C>>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new()
            .name("reentrant-pool-sweeper".to_string())
            .spawn({
                let shutdown = Arc::clone(&shutdown);
                move || {
                    debug!(?interval, "sweeper thread started");
                    sweep_loop(&provider, &shutdown, interval);
                    debug!("sweeper thread exiting");
                }
            })
            .expect("failed to spawn sweeper thread: thread spawning failure is not supported");

        Self {
            shutdown,
            thread: Some(thread),
        }
    }
}

#[cfg_attr(test, mutants::skip)] // Mutating the wait conditions only makes the loop spin or hang.
fn sweep_loop<C: Context>(
    provider: &Weak<ProviderInner<C>>,
    shutdown: &AtomicBool,
    interval: Duration,
) {
    // `None` when the interval reaches past what `Instant` can represent.
    let mut next_pass = Instant::now().checked_add(interval);

    loop {
        // Acquire ordering synchronizes with Release in Drop.
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        // Wakes early on unpark or spuriously; the loop re-checks both conditions.
        match next_pass {
            None => {
                thread::park();
                continue;
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    thread::park_timeout(deadline.saturating_duration_since(now));
                    continue;
                }
            }
        }

        let Some(provider) = provider.upgrade() else {
            return;
        };

        let report = provider.reclaim(MemoryPressure::None);
        trace!(
            examined = report.examined(),
            reclaimed = report.reclaimed(),
            "sweeper pass finished"
        );

        next_pass = Instant::now().checked_add(interval);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        let Some(handle) = self.thread.take() else {
            return;
        };

        handle.thread().unpark();

        if let Err(payload) = handle.join() {
            // Re-raising while already unwinding would abort the process.
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
