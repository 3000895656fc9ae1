//! Metrics for context providers.
//!
//! The events are per-thread instances to avoid contention on the acquire/release path.

use nm::{Event, Magnitude};

/// Histogram buckets for the affinity stack depth an acquisition lands on.
///
/// Depth 0 is the common non-nested case. Anything past a handful means deep reentrancy.
const AFFINITY_DEPTH_BUCKETS: &[Magnitude] = &[0, 1, 2, 3, 4, 8, 16];

thread_local! {
    /// A new context was constructed because none was available or the available one expired.
    pub(crate) static CONTEXTS_CREATED: Event = Event::builder()
        .name("reentrant_pool_contexts_created")
        .build();

    /// An idle context was handed out again.
    pub(crate) static CONTEXTS_REUSED: Event = Event::builder()
        .name("reentrant_pool_contexts_reused")
        .build();

    /// An idle context was dropped by a reclaim pass or expired on resolution.
    pub(crate) static CONTEXTS_RECLAIMED: Event = Event::builder()
        .name("reentrant_pool_contexts_reclaimed")
        .build();

    /// An affinity-mode acquisition went past the depth cap and used the overflow queue.
    pub(crate) static OVERFLOW_ACQUISITIONS: Event = Event::builder()
        .name("reentrant_pool_overflow_acquisitions")
        .build();

    /// Stack depth at which affinity-mode acquisitions are served.
    pub(crate) static AFFINITY_DEPTH: Event = Event::builder()
        .name("reentrant_pool_affinity_depth")
        .histogram(AFFINITY_DEPTH_BUCKETS)
        .build();
}
