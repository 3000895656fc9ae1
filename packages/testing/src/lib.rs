#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the reentrant context pool.

use std::env;
use std::panic;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

mod checkout_ledger;

pub use checkout_ledger::*;

/// Runs a test body on a separate thread and fails the test if it does not finish in time.
///
/// Concurrency tests that deadlock would otherwise hang the test run forever. The limit is
/// 30 seconds, or 120 seconds under Miri.
///
/// When `MUTATION_TESTING=1` is set, the body runs directly without a watchdog, so that mutation
/// testing can detect mutations that hang.
///
/// # Panics
///
/// Panics if the body exceeds the time limit, and re-raises any panic from the body.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(body: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return body();
    }

    let timeout = if cfg!(miri) {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(30)
    };

    let (tx, rx) = mpsc::channel();

    let handle = thread::Builder::new()
        .name("watched-test".to_string())
        .spawn(move || {
            // The receiver is gone if we already timed out.
            drop(tx.send(body()));
        })
        .expect("failed to spawn test thread: thread spawning failure is not supported");

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }

            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the {timeout:?} watchdog limit, likely a deadlock");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match handle.join() {
            Ok(()) => panic!("test thread exited without producing a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_body_result() {
        assert_eq!(with_watchdog(|| "done"), "done");
    }

    #[test]
    #[should_panic]
    fn watchdog_propagates_body_panic() {
        with_watchdog(|| panic!("body failed"));
    }
}
