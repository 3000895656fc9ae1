//! Shared backing: one lock-free queue of idle contexts for all callers.

use std::time::Duration;

use crossbeam::queue::SegQueue;

use crate::reclaim_handle::{Idle, ReclaimHandle};
use crate::{MemoryPressure, ReclaimReport};

/// Idle contexts available to any caller, in no particular order.
pub(crate) struct SharedQueue<C> {
    idle: SegQueue<ReclaimHandle<C>>,
}

impl<C> SharedQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            idle: SegQueue::new(),
        }
    }

    /// Pops handles until one resolves to a live context or the queue runs dry.
    ///
    /// Expired handles encountered on the way are discarded; their count is returned so the
    /// caller can account for them as reclaimed.
    pub(crate) fn take(&self, minimal_idle_timeout: Duration) -> (Option<Idle<C>>, usize) {
        let mut expired: usize = 0;

        while let Some(handle) = self.idle.pop() {
            match handle.resolve(minimal_idle_timeout) {
                Some(idle) => return (Some(idle), expired),
                None => expired = expired.saturating_add(1),
            }
        }

        (None, expired)
    }

    pub(crate) fn put(&self, handle: ReclaimHandle<C>) {
        self.idle.push(handle);
    }

    /// Runs a reclaim pass over the handles queued when the pass starts.
    ///
    /// Handles pushed concurrently may or may not be examined. Handles popped for examination
    /// are briefly invisible to concurrent `take()` calls, which then construct instead.
    pub(crate) fn reclaim(&self, pressure: MemoryPressure) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for _ in 0..self.idle.len() {
            let Some(mut handle) = self.idle.pop() else {
                break;
            };

            let was_expired = handle.is_expired();
            report.record(was_expired || handle.reclaim(pressure));

            if !handle.is_expired() {
                self.idle.push(handle);
            }
        }

        report
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.idle.len()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ContextId, Retention};

    assert_impl_all!(SharedQueue<Vec<u8>>: Send, Sync);

    const GENEROUS: Duration = Duration::from_secs(3600);

    fn handle(retention: Retention, id: u64) -> ReclaimHandle<u64> {
        ReclaimHandle::new(retention, Idle::new(ContextId::new(id), Box::new(id)))
    }

    #[test]
    fn take_from_empty_queue_is_none() {
        let queue = SharedQueue::<u64>::new();

        let (idle, expired) = queue.take(GENEROUS);

        assert!(idle.is_none());
        assert_eq!(expired, 0);
    }

    #[test]
    fn put_then_take_returns_context() {
        let queue = SharedQueue::new();
        queue.put(handle(Retention::Always, 5));

        let (idle, _) = queue.take(GENEROUS);

        assert_eq!(*idle.unwrap().context, 5);
        assert_eq!(queue.len(), 0);
    }

    #[cfg_attr(miri, ignore)] // Real time waits are too slow under Miri.
    #[test]
    fn take_skips_and_counts_expired_handles() {
        let queue = SharedQueue::new();
        queue.put(handle(Retention::Minimal, 1));
        queue.put(handle(Retention::Minimal, 2));
        queue.put(handle(Retention::Always, 3));

        std::thread::sleep(Duration::from_millis(5));

        // Both minimal handles have been idle for longer than a zero timeout.
        let (idle, expired) = queue.take(Duration::ZERO);

        assert_eq!(*idle.unwrap().context, 3);
        assert_eq!(expired, 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn take_after_reclaim_finds_no_expired_handles() {
        let queue = SharedQueue::new();
        queue.put(handle(Retention::Minimal, 1));
        queue.put(handle(Retention::Minimal, 2));

        let report = queue.reclaim(MemoryPressure::None);
        assert_eq!(report.reclaimed(), 2);

        queue.put(handle(Retention::Always, 3));

        let (idle, expired) = queue.take(GENEROUS);
        assert_eq!(*idle.unwrap().context, 3);
        assert_eq!(expired, 0);
    }

    #[test]
    fn reclaim_respects_retention() {
        let queue = SharedQueue::new();
        queue.put(handle(Retention::Always, 1));
        queue.put(handle(Retention::WhileMemoryAvailable, 2));
        queue.put(handle(Retention::Minimal, 3));

        let routine = queue.reclaim(MemoryPressure::None);
        assert_eq!(routine.examined(), 3);
        assert_eq!(routine.reclaimed(), 1);
        assert_eq!(queue.len(), 2);

        let pressured = queue.reclaim(MemoryPressure::Moderate);
        assert_eq!(pressured.reclaimed(), 1);
        assert_eq!(queue.len(), 1);

        let (idle, _) = queue.take(GENEROUS);
        assert_eq!(*idle.unwrap().context, 1);
    }
}
