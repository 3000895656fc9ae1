//! Integration tests for providers shared between many threads.
//!
//! These tests use real threads and are ignored under Miri, where they would take too long.

use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use reentrant_pool::{
    BackingMode, ContextProvider, ContextSizing, Error, MemoryPressure, Retention, ScratchContext,
};
use testing::{CheckoutLedger, with_watchdog};

const THREADS: usize = 8;
const CYCLES: usize = 1000;

fn small_provider(backing: BackingMode, retention: Retention) -> ContextProvider<ScratchContext> {
    ContextProvider::builder()
        .backing(backing)
        .retention(retention)
        .sizing(ContextSizing::new(16, 16))
        .log_settings(false)
        .build()
}

/// One unit of work: acquire, check exclusivity and cleanliness, scribble, and on some cycles
/// nest `nesting` further acquisitions inside.
fn cycle(
    provider: &ContextProvider<ScratchContext>,
    ledger: &CheckoutLedger,
    nesting: usize,
) -> reentrant_pool::Result<()> {
    let mut context = provider.acquire()?;
    let _entry = ledger.enter(context.id().get());

    assert!(context.is_clean(), "acquired context {} was not reset", context.id());
    context.push_edge(1.0);
    context.push_crossing(-1);

    if nesting > 0 {
        cycle(provider, ledger, nesting - 1)?;
    }

    assert_eq!(context.edges(), &[1.0]);
    Ok(())
}

fn hammer(provider: &ContextProvider<ScratchContext>, ledger: &CheckoutLedger) -> usize {
    let completed = AtomicUsize::new(0);

    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            let completed = &completed;

            scope.spawn(move || {
                for cycle_index in 0..CYCLES {
                    let nesting = (thread_index + cycle_index) % 4;
                    cycle(provider, ledger, nesting).unwrap();
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    completed.into_inner()
}

#[cfg_attr(miri, ignore)]
#[test]
fn queue_minimal_scenario_completes_without_aliasing() {
    with_watchdog(|| {
        let provider = small_provider(BackingMode::Queue, Retention::Minimal);
        let ledger = CheckoutLedger::new();
        let done = AtomicBool::new(false);

        let completed = thread::scope(|scope| {
            // Reclaim passes race with the workers for the whole run.
            scope.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    provider.reclaim(MemoryPressure::Severe);
                    thread::yield_now();
                }
            });

            let completed = hammer(&provider, &ledger);
            done.store(true, Ordering::Relaxed);
            completed
        });

        assert_eq!(completed, THREADS * CYCLES);
        assert_eq!(ledger.in_use(), 0);
        assert!(ledger.peak() > 1);
        assert_eq!(provider.stats().checked_out(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn affinity_concurrent_callers_never_share_a_context() {
    with_watchdog(|| {
        let provider = small_provider(BackingMode::Affinity, Retention::WhileMemoryAvailable);
        let ledger = CheckoutLedger::new();

        let completed = hammer(&provider, &ledger);

        assert_eq!(completed, THREADS * CYCLES);
        assert_eq!(provider.stats().checked_out(), 0);

        // Each thread only ever needs as many contexts as its deepest nesting.
        let stats = provider.stats();
        assert!(stats.created() <= (THREADS * 4) as u64);
        assert_eq!(stats.overflow_acquisitions(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn affinity_overflow_under_concurrency_never_shares_a_context() {
    with_watchdog(|| {
        let provider = ContextProvider::<ScratchContext>::builder()
            .max_affinity_depth(NonZero::new(1).unwrap())
            .sizing(ContextSizing::new(16, 16))
            .log_settings(false)
            .build();
        let ledger = CheckoutLedger::new();

        let completed = hammer(&provider, &ledger);

        assert_eq!(completed, THREADS * CYCLES);
        assert!(provider.stats().overflow_acquisitions() > 0);
        assert_eq!(provider.stats().checked_out(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn affinity_slots_of_finished_threads_are_reclaimed() {
    with_watchdog(|| {
        let provider = small_provider(BackingMode::Affinity, Retention::WhileMemoryAvailable);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    drop(provider.acquire().unwrap());
                });
            }
        });

        let report = provider.reclaim(MemoryPressure::Moderate);

        assert_eq!(report.examined(), THREADS);
        assert_eq!(report.reclaimed(), THREADS);

        // Nothing is left behind for a second pass.
        assert_eq!(provider.reclaim(MemoryPressure::Severe).examined(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn affinity_contexts_of_exited_threads_are_dropped_whatever_the_retention() {
    with_watchdog(|| {
        let provider = Arc::new(small_provider(BackingMode::Affinity, Retention::Always));

        // Joining a spawned thread waits until its thread-locals are destroyed too.
        let threads = (0..THREADS)
            .map(|_| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || {
                    let outer = provider.acquire().unwrap();
                    drop(provider.acquire().unwrap());
                    drop(outer);
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }

        let report = provider.reclaim(MemoryPressure::None);

        assert_eq!(report.examined(), THREADS * 2);
        assert_eq!(report.reclaimed(), THREADS * 2);
        assert_eq!(provider.reclaim(MemoryPressure::Severe).examined(), 0);

        // The calling thread is alive and keeps its `Always` context.
        drop(provider.acquire().unwrap());
        assert_eq!(provider.reclaim(MemoryPressure::Severe).reclaimed(), 0);
    });
}

#[test]
fn nested_with_context_gets_independent_contexts() {
    for backing in [BackingMode::Affinity, BackingMode::Queue] {
        let provider = small_provider(backing, Retention::Always);

        let outer_edges = provider
            .with_context(|outer| {
                outer.push_edge(5.0);

                let inner_edges = provider
                    .with_context(|inner| {
                        assert!(inner.is_clean());
                        inner.push_edge(6.0);
                        inner.edges().to_vec()
                    })
                    .unwrap();

                assert_eq!(inner_edges, vec![6.0]);
                outer.edges().to_vec()
            })
            .unwrap();

        assert_eq!(outer_edges, vec![5.0]);
        assert_eq!(provider.stats().created(), 2);
        assert_eq!(provider.stats().checked_out(), 0);
    }
}

#[test]
fn reentrant_acquire_and_release_in_reverse_order() {
    for backing in [BackingMode::Affinity, BackingMode::Queue] {
        let provider = small_provider(backing, Retention::WhileMemoryAvailable);

        let a = provider.acquire().unwrap();
        let b = provider.acquire().unwrap();
        assert_ne!(a.id(), b.id());

        provider.release(b).unwrap();
        provider.release(a).unwrap();

        assert_eq!(provider.stats().checked_out(), 0);
    }
}

#[test]
fn out_of_order_release_is_rejected_and_recoverable() {
    let provider = small_provider(BackingMode::Affinity, Retention::Always);

    let a = provider.acquire().unwrap();
    let b = provider.acquire().unwrap();
    let (a_id, b_id) = (a.id(), b.id());

    let rejected = provider.release(a).unwrap_err();
    let (error, a) = rejected.into_parts();

    assert!(matches!(
        error,
        Error::OutOfOrderRelease { expected, actual } if expected == b_id && actual == a_id
    ));
    assert_eq!(provider.stats().checked_out(), 2);

    provider.release(b).unwrap();
    provider.release(a).unwrap();
}

#[test]
fn queue_mode_accepts_any_release_order() {
    let provider = small_provider(BackingMode::Queue, Retention::Always);

    let a = provider.acquire().unwrap();
    let b = provider.acquire().unwrap();

    provider.release(a).unwrap();
    provider.release(b).unwrap();
}

#[test]
fn foreign_release_hands_guard_back() {
    let home = small_provider(BackingMode::Affinity, Retention::Always);
    let elsewhere = small_provider(BackingMode::Affinity, Retention::Always);

    let pooled = home.acquire().unwrap();

    let rejected = elsewhere.release(pooled).unwrap_err();
    assert!(matches!(rejected.error(), Error::ForeignContext { .. }));

    home.release(rejected.into_inner()).unwrap();
    assert_eq!(home.stats().checked_out(), 0);
}

#[test]
fn reclaimed_context_is_replaced_transparently() {
    let provider = small_provider(BackingMode::Affinity, Retention::WhileMemoryAvailable);

    let first = provider.acquire().unwrap().id();
    provider.reclaim(MemoryPressure::Severe);

    let second = provider.acquire().unwrap();

    assert_ne!(second.id(), first);
    assert!(second.is_clean());
}

#[test]
fn impossible_sizing_fails_acquire_without_side_effects() {
    let provider = ContextProvider::<ScratchContext>::builder()
        .sizing(ContextSizing::new(usize::MAX, 1))
        .log_settings(false)
        .build();

    assert!(matches!(provider.acquire(), Err(Error::Allocation(_))));
    assert!(matches!(provider.acquire(), Err(Error::Allocation(_))));

    let stats = provider.stats();
    assert_eq!(stats.created(), 0);
    assert_eq!(stats.checked_out(), 0);
}
