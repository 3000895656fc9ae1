//! The context provider and its shared state.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::affinity::{AffinityRegistry, Reservation, StackEntry};
use crate::context::ContextIdSource;
use crate::diagnostics::log_settings_once;
use crate::metrics::{
    AFFINITY_DEPTH, CONTEXTS_CREATED, CONTEXTS_RECLAIMED, CONTEXTS_REUSED, OVERFLOW_ACQUISITIONS,
};
use crate::pooled::{Checkout, Origin, Rejected};
use crate::reclaim_handle::{Idle, ReclaimHandle};
use crate::shared_queue::SharedQueue;
use crate::sweeper::Sweeper;
use crate::{
    BackingMode, Context, ContextId, ContextProviderBuilder, Error, MemoryPressure, PoolConfig,
    Pooled, ReleaseError, Result,
};

enum Backing<C> {
    Affinity {
        registry: AffinityRegistry<C>,
        overflow: SharedQueue<C>,
    },
    Queue(SharedQueue<C>),
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    reclaimed: AtomicU64,
    overflow_acquisitions: AtomicU64,
    checked_out: AtomicUsize,
}

// Relaxed throughout: the counters are statistics and never order other memory operations.
impl Counters {
    fn add(counter: &AtomicU64, amount: u64) {
        if amount > 0 {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            overflow_acquisitions: self.overflow_acquisitions.load(Ordering::Relaxed),
            checked_out: self.checked_out.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct ProviderInner<C> {
    config: PoolConfig,
    ids: ContextIdSource,
    backing: Backing<C>,
    counters: Counters,
}

impl<C> fmt::Debug for ProviderInner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<C: Context> ProviderInner<C> {
    fn new(config: PoolConfig) -> Self {
        let backing = match config.backing() {
            BackingMode::Affinity => Backing::Affinity {
                registry: AffinityRegistry::new(),
                overflow: SharedQueue::new(),
            },
            BackingMode::Queue => Backing::Queue(SharedQueue::new()),
        };

        Self {
            config,
            ids: ContextIdSource::new(),
            backing,
            counters: Counters::default(),
        }
    }

    fn shared_queue(&self) -> &SharedQueue<C> {
        match &self.backing {
            Backing::Affinity { overflow, .. } => overflow,
            Backing::Queue(queue) => queue,
        }
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> Result<Pooled<C>> {
        log_settings_once::<C>(&self.config);

        let checkout = match &self.backing {
            Backing::Affinity { registry, .. } => self.acquire_affinity(registry)?,
            Backing::Queue(queue) => {
                let (id, context) = self.take_or_create(queue)?;
                Checkout {
                    id,
                    context,
                    origin: Origin::Shared,
                }
            }
        };

        self.counters.checked_out.fetch_add(1, Ordering::Relaxed);
        trace!(id = checkout.id.get(), "checked out context");

        Ok(Pooled::new(Arc::clone(self), checkout))
    }

    fn acquire_affinity(&self, registry: &AffinityRegistry<C>) -> Result<Checkout<C>> {
        let slot = registry.slot_for_current_thread();

        // `create()` may re-enter this provider, so it runs without the stack lock.
        let claimed = slot.lock().claim(self.config.max_affinity_depth().get());

        if let Some((depth, previous)) = claimed {
            let reservation = Reservation::new(&slot, depth);

            let resolved = match previous {
                StackEntry::Idle(handle) => {
                    let resolved = handle.resolve(self.config.minimal_idle_timeout());
                    if resolved.is_none() {
                        self.record_reclaimed(1);
                    }
                    resolved
                }
                StackEntry::Vacant | StackEntry::Reserved | StackEntry::CheckedOut(_) => None,
            };

            // On failure the reservation is dropped, which vacates the position again.
            let (id, context) = match resolved {
                Some(idle) => self.reuse(idle),
                None => self.create()?,
            };

            reservation.check_out(id);

            AFFINITY_DEPTH.with(|event| event.observe(depth));

            return Ok(Checkout {
                id,
                context,
                origin: Origin::Stack { slot, depth },
            });
        }

        // Every stack position is taken: nested deeper than the cap allows.
        let (id, context) = self.take_or_create(self.shared_queue())?;
        slot.lock().record_overflow(id);

        Counters::add(&self.counters.overflow_acquisitions, 1);
        OVERFLOW_ACQUISITIONS.with(nm::Event::observe_once);
        trace!(id = id.get(), "served nested acquisition from overflow queue");

        Ok(Checkout {
            id,
            context,
            origin: Origin::Overflow { slot },
        })
    }

    fn take_or_create(&self, queue: &SharedQueue<C>) -> Result<(ContextId, Box<C>)> {
        let (idle, expired) = queue.take(self.config.minimal_idle_timeout());
        self.record_reclaimed(expired);

        match idle {
            Some(idle) => Ok(self.reuse(idle)),
            None => self.create(),
        }
    }

    fn reuse(&self, idle: Idle<C>) -> (ContextId, Box<C>) {
        Counters::add(&self.counters.reused, 1);
        CONTEXTS_REUSED.with(nm::Event::observe_once);

        (idle.id, idle.context)
    }

    fn create(&self) -> Result<(ContextId, Box<C>)> {
        let context = C::create(&self.config.sizing())?;
        let id = self.ids.next();

        Counters::add(&self.counters.created, 1);
        CONTEXTS_CREATED.with(nm::Event::observe_once);
        debug!(id = id.get(), context_type = type_name::<C>(), "created context");

        Ok((id, Box::new(context)))
    }

    fn record_reclaimed(&self, count: usize) {
        if count == 0 {
            return;
        }

        Counters::add(&self.counters.reclaimed, u64::try_from(count).unwrap_or(u64::MAX));
        CONTEXTS_RECLAIMED.with(|event| event.batch(count).observe_once());
    }

    fn put_shared(&self, queue: &SharedQueue<C>, id: ContextId, mut context: Box<C>) {
        context.reset();
        queue.put(ReclaimHandle::new(
            self.config.retention(),
            Idle::new(id, context),
        ));
    }

    /// Returns a checkout to where it came from, resetting the context on the way.
    ///
    /// On rejection nothing is changed and the checkout is handed back.
    pub(crate) fn check_in(
        &self,
        checkout: Checkout<C>,
    ) -> std::result::Result<(), Rejected<C>> {
        let Checkout {
            id,
            context,
            origin,
        } = checkout;

        match origin {
            Origin::Stack { slot, depth } => {
                if let Err((error, context)) =
                    slot.release_to_stack(id, depth, context, self.config.retention())
                {
                    return Err(Rejected {
                        error,
                        checkout: Checkout {
                            id,
                            context,
                            origin: Origin::Stack { slot, depth },
                        },
                    });
                }
            }
            Origin::Overflow { slot } => {
                if let Err(error) = slot.release_overflow(id) {
                    return Err(Rejected {
                        error,
                        checkout: Checkout {
                            id,
                            context,
                            origin: Origin::Overflow { slot },
                        },
                    });
                }

                self.put_shared(self.shared_queue(), id, context);
            }
            Origin::Shared => self.put_shared(self.shared_queue(), id, context),
        }

        self.counters.checked_out.fetch_sub(1, Ordering::Relaxed);
        trace!(id = id.get(), "released context");

        Ok(())
    }

    /// Discards a checkout that could not be released, keeping the stack it came from
    /// consistent. The context is dropped.
    pub(crate) fn abandon(&self, checkout: Checkout<C>) {
        match &checkout.origin {
            Origin::Stack { slot, depth } => slot.lock().abandon(checkout.id, Some(*depth)),
            Origin::Overflow { slot } => slot.lock().abandon(checkout.id, None),
            Origin::Shared => {}
        }

        self.counters.checked_out.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn reclaim(&self, pressure: MemoryPressure) -> ReclaimReport {
        let report = match &self.backing {
            Backing::Affinity { registry, overflow } => {
                let mut report = registry.reclaim(pressure);
                report.merge(overflow.reclaim(pressure));
                report
            }
            Backing::Queue(queue) => queue.reclaim(pressure),
        };

        self.record_reclaimed(report.reclaimed());
        debug!(
            ?pressure,
            examined = report.examined(),
            reclaimed = report.reclaimed(),
            "reclaim pass finished"
        );

        report
    }
}

/// Hands out reusable [`Context`]s to callers on any number of threads.
///
/// A provider is typically created once per consumer and kept in a `static` or shared via
/// [`Arc`]. It is [`Send`] and [`Sync`], and [`acquire()`][Self::acquire] and
/// [`release()`][Self::release] may be called concurrently from any number of threads.
///
/// No context is constructed before the first `acquire()`.
///
/// # Reentrancy
///
/// A thread that already holds a context may acquire another. It gets an independent context,
/// never the one it is already using. In [`BackingMode::Affinity`], nested acquisitions must be
/// released in reverse order.
///
/// # Example
///
/// ```
/// use reentrant_pool::{ContextProvider, ScratchContext};
///
/// let provider = ContextProvider::<ScratchContext>::new();
///
/// let mut outer = provider.acquire()?;
/// outer.push_edge(1.0);
///
/// {
///     // Nested use on the same thread gets a different context.
///     let inner = provider.acquire()?;
///     assert_ne!(inner.id(), outer.id());
///     assert!(inner.is_clean());
/// }
///
/// provider.release(outer).map_err(|rejected| rejected.into_parts().0)?;
/// # Ok::<(), reentrant_pool::Error>(())
/// ```
pub struct ContextProvider<C: Context> {
    inner: Arc<ProviderInner<C>>,

    // Dropped with the provider, which stops and joins the sweeper thread.
    sweeper: Option<Sweeper>,
}

impl<C: Context> ContextProvider<C> {
    /// Creates a provider with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(PoolConfig::default())
    }

    /// Creates a builder for configuring the provider.
    pub fn builder() -> ContextProviderBuilder<C> {
        ContextProviderBuilder::new()
    }

    /// Creates a provider with the given configuration.
    ///
    /// If the configuration has a sweep interval, a background sweeper thread is started.
    #[must_use]
    pub fn from_config(config: PoolConfig) -> Self {
        let sweep_interval = config.sweep_interval();
        let inner = Arc::new(ProviderInner::new(config));

        let sweeper =
            sweep_interval.map(|interval| Sweeper::spawn(Arc::downgrade(&inner), interval));

        Self { inner, sweeper }
    }

    /// Checks out a context for exclusive use by the calling thread.
    ///
    /// Reuses an idle context if one is available and has not been reclaimed, otherwise
    /// constructs a new one. A reused context is always in its reset state.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Context::create()`] if a new context had to be constructed and
    /// construction failed. The provider is unchanged in that case.
    pub fn acquire(&self) -> Result<Pooled<C>> {
        self.inner.acquire()
    }

    /// Releases a context back to the provider, resetting it.
    ///
    /// Dropping the guard does the same; this method reports pairing errors as values instead
    /// of panicking.
    ///
    /// # Errors
    ///
    /// Rejects the release, handing the guard back inside the error and leaving the provider
    /// unchanged, if:
    ///
    /// * the guard was acquired from a different provider ([`Error::ForeignContext`]);
    /// * nested acquisitions are released out of order ([`Error::OutOfOrderRelease`]);
    /// * the calling thread does not hold the context ([`Error::NotHeldByCaller`]).
    pub fn release(&self, mut pooled: Pooled<C>) -> std::result::Result<(), ReleaseError<C>> {
        if !Arc::ptr_eq(&pooled.provider, &self.inner) {
            let id = pooled.id();
            return Err(ReleaseError::new(Error::ForeignContext { id }, pooled));
        }

        let Some(checkout) = pooled.checkout.take() else {
            return Ok(());
        };

        match self.inner.check_in(checkout) {
            Ok(()) => Ok(()),
            Err(Rejected { error, checkout }) => {
                pooled.checkout = Some(checkout);
                Err(ReleaseError::new(error, pooled))
            }
        }
    }

    /// Runs `f` with a context that is released when `f` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns the error of [`acquire()`][Self::acquire].
    pub fn with_context<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R> {
        let mut pooled = self.acquire()?;
        Ok(f(&mut pooled))
    }

    /// Runs a reclaim pass, dropping idle contexts whose retention strength allows it at the
    /// given memory pressure.
    ///
    /// Checked-out contexts are never affected. A caller whose idle context was reclaimed
    /// transparently gets a freshly constructed one on its next acquisition.
    pub fn reclaim(&self, pressure: MemoryPressure) -> ReclaimReport {
        self.inner.reclaim(pressure)
    }

    /// Counters describing the provider's activity so far.
    #[must_use]
    pub fn stats(&self) -> ProviderStats {
        self.inner.counters.snapshot()
    }

    /// The configuration the provider was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<C: Context> Default for ContextProvider<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Context> fmt::Debug for ContextProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("inner", &self.inner)
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

/// Outcome of a reclaim pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReclaimReport {
    examined: usize,
    reclaimed: usize,
}

impl ReclaimReport {
    /// Number of idle contexts the pass looked at.
    #[must_use]
    pub fn examined(&self) -> usize {
        self.examined
    }

    /// Number of idle contexts the pass dropped.
    #[must_use]
    pub fn reclaimed(&self) -> usize {
        self.reclaimed
    }

    pub(crate) fn record(&mut self, reclaimed: bool) {
        self.examined = self.examined.saturating_add(1);

        if reclaimed {
            self.reclaimed = self.reclaimed.saturating_add(1);
        }
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.examined = self.examined.saturating_add(other.examined);
        self.reclaimed = self.reclaimed.saturating_add(other.reclaimed);
    }
}

/// Snapshot of a provider's counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProviderStats {
    created: u64,
    reused: u64,
    reclaimed: u64,
    overflow_acquisitions: u64,
    checked_out: usize,
}

impl ProviderStats {
    /// Contexts constructed.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Acquisitions served by an idle context.
    #[must_use]
    pub fn reused(&self) -> u64 {
        self.reused
    }

    /// Idle contexts dropped by reclaim passes or expired on resolution.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }

    /// Affinity acquisitions nested deeper than the stack cap.
    #[must_use]
    pub fn overflow_acquisitions(&self) -> u64 {
        self.overflow_acquisitions
    }

    /// Contexts currently checked out.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.checked_out
    }
}
