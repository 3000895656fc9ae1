//! Retention wrappers around idle contexts.

use std::time::{Duration, Instant};

use crate::{ContextId, MemoryPressure, Retention};

/// A context that is not checked out, together with the time it was released.
pub(crate) struct Idle<C> {
    pub(crate) id: ContextId,
    pub(crate) context: Box<C>,
    pub(crate) since: Instant,
}

impl<C> Idle<C> {
    pub(crate) fn new(id: ContextId, context: Box<C>) -> Self {
        Self {
            id,
            context,
            since: Instant::now(),
        }
    }
}

/// Holds one idle context with a retention strength.
///
/// A handle only ever holds an idle context: a checked-out context is owned by its guard, so
/// reclaiming a handle can never pull a context out from under a caller. The `Strong` variant
/// has no empty state, which is what makes [`Retention::Always`] contexts unreclaimable.
pub(crate) enum ReclaimHandle<C> {
    Strong(Idle<C>),
    WeakUnderPressure(Option<Idle<C>>),
    WeakAlways(Option<Idle<C>>),
}

impl<C> ReclaimHandle<C> {
    pub(crate) fn new(retention: Retention, idle: Idle<C>) -> Self {
        match retention {
            Retention::Always => Self::Strong(idle),
            Retention::WhileMemoryAvailable => Self::WeakUnderPressure(Some(idle)),
            Retention::Minimal => Self::WeakAlways(Some(idle)),
        }
    }

    pub(crate) fn retention(&self) -> Retention {
        match self {
            Self::Strong(_) => Retention::Always,
            Self::WeakUnderPressure(_) => Retention::WhileMemoryAvailable,
            Self::WeakAlways(_) => Retention::Minimal,
        }
    }

    /// Returns the idle context, or `None` if the handle has expired.
    ///
    /// A `WeakAlways` handle also expires here once its context has been idle for longer than
    /// `minimal_idle_timeout`; the stale context is dropped.
    pub(crate) fn resolve(self, minimal_idle_timeout: Duration) -> Option<Idle<C>> {
        match self {
            Self::Strong(idle) => Some(idle),
            Self::WeakUnderPressure(idle) => idle,
            Self::WeakAlways(idle) => {
                idle.filter(|idle| idle.since.elapsed() <= minimal_idle_timeout)
            }
        }
    }

    /// Drops the held context if the retention strength allows it at this pressure.
    ///
    /// Returns whether a context was dropped by this call.
    pub(crate) fn reclaim(&mut self, pressure: MemoryPressure) -> bool {
        if !self.retention().reclaims_at(pressure) {
            return false;
        }

        match self {
            Self::Strong(_) => false,
            Self::WeakUnderPressure(idle) | Self::WeakAlways(idle) => idle.take().is_some(),
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        match self {
            Self::Strong(_) => false,
            Self::WeakUnderPressure(idle) | Self::WeakAlways(idle) => idle.is_none(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use super::*;

    fn idle(id: u64) -> Idle<String> {
        Idle::new(ContextId::new(id), Box::new(format!("context {id}")))
    }

    const GENEROUS: Duration = Duration::from_secs(3600);

    #[test]
    fn new_picks_variant_from_retention() {
        assert!(matches!(
            ReclaimHandle::new(Retention::Always, idle(1)),
            ReclaimHandle::Strong(_)
        ));
        assert!(matches!(
            ReclaimHandle::new(Retention::WhileMemoryAvailable, idle(2)),
            ReclaimHandle::WeakUnderPressure(Some(_))
        ));
        assert!(matches!(
            ReclaimHandle::new(Retention::Minimal, idle(3)),
            ReclaimHandle::WeakAlways(Some(_))
        ));
    }

    #[test]
    fn strong_survives_severe_pressure() {
        let mut handle = ReclaimHandle::new(Retention::Always, idle(1));

        assert!(!handle.reclaim(MemoryPressure::Severe));
        assert!(!handle.is_expired());

        let resolved = handle.resolve(GENEROUS).unwrap();
        assert_eq!(resolved.id, ContextId::new(1));
        assert_eq!(*resolved.context, "context 1");
    }

    #[test]
    fn weak_under_pressure_survives_routine_sweep() {
        let mut handle = ReclaimHandle::new(Retention::WhileMemoryAvailable, idle(1));

        assert!(!handle.reclaim(MemoryPressure::None));
        assert!(handle.resolve(GENEROUS).is_some());
    }

    #[test]
    fn weak_under_pressure_is_cleared_by_moderate_pressure() {
        let mut handle = ReclaimHandle::new(Retention::WhileMemoryAvailable, idle(1));

        assert!(handle.reclaim(MemoryPressure::Moderate));
        assert!(handle.is_expired());

        // Already empty, nothing more to drop.
        assert!(!handle.reclaim(MemoryPressure::Severe));
        assert!(handle.resolve(GENEROUS).is_none());
    }

    #[test]
    fn weak_always_is_cleared_by_routine_sweep() {
        let mut handle = ReclaimHandle::new(Retention::Minimal, idle(1));

        assert!(handle.reclaim(MemoryPressure::None));
        assert!(handle.resolve(GENEROUS).is_none());
    }

    #[test]
    fn weak_always_expires_after_idle_timeout() {
        let handle = ReclaimHandle::new(Retention::Minimal, idle(1));

        thread::sleep(Duration::from_millis(5));

        assert!(handle.resolve(Duration::ZERO).is_none());
    }

    #[test]
    fn weak_under_pressure_ignores_idle_timeout() {
        let handle = ReclaimHandle::new(Retention::WhileMemoryAvailable, idle(1));

        thread::sleep(Duration::from_millis(5));

        assert!(handle.resolve(Duration::ZERO).is_some());
    }
}
