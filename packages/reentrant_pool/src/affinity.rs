//! Affinity backing: a registry of per-thread context stacks.

use std::mem;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use foldhash::{HashMap, HashMapExt};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::reclaim_handle::{Idle, ReclaimHandle};
use crate::{Context, ContextId, Error, MemoryPressure, ReclaimReport, Result, Retention};

/// One position in a thread's context stack.
pub(crate) enum StackEntry<C> {
    /// Nothing held. Either never filled or the held context was reclaimed.
    Vacant,

    /// Claimed by the owner thread, which is constructing or resetting the context for it
    /// without holding the stack lock.
    Reserved,

    /// Holds a released context that may be handed out again.
    Idle(ReclaimHandle<C>),

    /// The context is in use by the owner thread.
    CheckedOut(ContextId),
}

/// The context stack of one thread.
///
/// `entries` holds at most `max_affinity_depth` positions. `outstanding` lists every
/// acquisition the thread has not released yet, in acquisition order, including those served
/// by the overflow queue; it is what release pairing is checked against.
pub(crate) struct AffinityStack<C> {
    entries: Vec<StackEntry<C>>,
    outstanding: Vec<ContextId>,
}

impl<C> AffinityStack<C> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            outstanding: Vec::new(),
        }
    }

    /// Claims the lowest position that is neither checked out nor reserved, growing the stack
    /// if needed.
    ///
    /// Returns the position and whatever it held, leaving it reserved, or `None` if every
    /// position up to `max_depth` is taken.
    pub(crate) fn claim(&mut self, max_depth: usize) -> Option<(usize, StackEntry<C>)> {
        let free = self.entries.iter().position(|entry| {
            !matches!(entry, StackEntry::CheckedOut(_) | StackEntry::Reserved)
        });

        if let Some(depth) = free {
            let entry = self.entries.get_mut(depth)?;
            return Some((depth, mem::replace(entry, StackEntry::Reserved)));
        }

        if self.entries.len() >= max_depth {
            return None;
        }

        self.entries.push(StackEntry::Reserved);
        Some((self.entries.len().saturating_sub(1), StackEntry::Vacant))
    }

    pub(crate) fn mark_checked_out(&mut self, depth: usize, id: ContextId) {
        let entry = self
            .entries
            .get_mut(depth)
            .expect("claimed positions stay in the stack until released");
        *entry = StackEntry::CheckedOut(id);

        self.outstanding.push(id);
    }

    pub(crate) fn record_overflow(&mut self, id: ContextId) {
        self.outstanding.push(id);
    }

    /// Checks that `id` is the most recent unreleased acquisition of this thread.
    pub(crate) fn validate_release(&self, id: ContextId) -> Result<()> {
        match self.outstanding.last() {
            Some(&last) if last == id => Ok(()),
            Some(&last) if self.outstanding.contains(&id) => Err(Error::OutOfOrderRelease {
                expected: last,
                actual: id,
            }),
            _ => Err(Error::NotHeldByCaller { id }),
        }
    }

    /// Records a validated release. The context itself is stored separately, if at all.
    pub(crate) fn complete_release(&mut self) {
        self.outstanding.pop();
    }

    /// Turns a checked-out position into a reserved one while its context is being reset.
    fn reserve(&mut self, depth: usize) {
        if let Some(entry) = self.entries.get_mut(depth) {
            *entry = StackEntry::Reserved;
        }
    }

    pub(crate) fn store_idle(&mut self, depth: usize, handle: ReclaimHandle<C>) {
        if let Some(entry) = self.entries.get_mut(depth) {
            *entry = StackEntry::Idle(handle);
        }
    }

    /// Gives up a reserved position that was never filled.
    fn vacate(&mut self, depth: usize) {
        if let Some(entry) = self.entries.get_mut(depth) {
            if matches!(entry, StackEntry::Reserved) {
                *entry = StackEntry::Vacant;
            }
        }

        self.trim();
    }

    /// Forgets a checkout whose context is being discarded instead of released.
    pub(crate) fn abandon(&mut self, id: ContextId, depth: Option<usize>) {
        self.outstanding.retain(|outstanding| *outstanding != id);

        if let Some(entry) = depth.and_then(|depth| self.entries.get_mut(depth)) {
            if matches!(entry, StackEntry::CheckedOut(held) if *held == id) {
                *entry = StackEntry::Vacant;
            }
        }

        self.trim();
    }

    pub(crate) fn reclaim(&mut self, pressure: MemoryPressure) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for entry in &mut self.entries {
            let StackEntry::Idle(handle) = entry else {
                continue;
            };

            let was_expired = handle.is_expired();
            report.record(was_expired || handle.reclaim(pressure));

            if handle.is_expired() {
                *entry = StackEntry::Vacant;
            }
        }

        self.trim();
        report
    }

    /// Drops every idle context regardless of retention. Used once the owner thread has
    /// exited and can never acquire from this stack again.
    fn discard_idle(&mut self) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for entry in &mut self.entries {
            if matches!(entry, StackEntry::Idle(_)) {
                report.record(true);
                *entry = StackEntry::Vacant;
            }
        }

        self.trim();
        report
    }

    /// Drops vacant positions from the top of the stack.
    pub(crate) fn trim(&mut self) {
        while matches!(self.entries.last(), Some(StackEntry::Vacant)) {
            self.entries.pop();
        }
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.outstanding.is_empty() && self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }
}

thread_local! {
    // Dropped when the thread exits, which is how a registry tells that a stack is orphaned.
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

/// The context stack of one thread, shared between the registry and that thread's guards.
pub(crate) struct AffinitySlot<C> {
    owner: ThreadId,
    owner_alive: Weak<()>,
    stack: Mutex<AffinityStack<C>>,
}

impl<C: Context> AffinitySlot<C> {
    fn new(owner: ThreadId) -> Self {
        // During thread-local destruction the thread counts as exited already.
        let owner_alive = THREAD_ALIVE.try_with(Arc::downgrade).unwrap_or_default();

        Self {
            owner,
            owner_alive,
            stack: Mutex::new(AffinityStack::new()),
        }
    }

    /// Whether the owner thread has exited. Its idle contexts can never be handed out again.
    fn is_orphaned(&self) -> bool {
        self.owner_alive.strong_count() == 0
    }

    /// Locks the stack. Only the owner thread and reclaim passes ever lock it, so this is
    /// uncontended outside of reclaim passes.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AffinityStack<C>> {
        self.stack.lock()
    }

    fn check_caller(&self, id: ContextId) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::NotHeldByCaller { id })
        }
    }

    /// Validates and performs the release of a context held in the stack at `depth`.
    ///
    /// The context is reset before it becomes idle. On rejection it is handed back untouched.
    pub(crate) fn release_to_stack(
        &self,
        id: ContextId,
        depth: usize,
        mut context: Box<C>,
        retention: Retention,
    ) -> std::result::Result<(), (Error, Box<C>)> {
        if let Err(error) = self.check_caller(id) {
            return Err((error, context));
        }

        {
            let mut stack = self.lock();

            if let Err(error) = stack.validate_release(id) {
                return Err((error, context));
            }

            stack.complete_release();
            stack.reserve(depth);
        }

        // Resetting runs context code, which may itself use the provider on this thread.
        let reservation = Reservation::new(self, depth);
        context.reset();
        reservation.store_idle(ReclaimHandle::new(retention, Idle::new(id, context)));

        Ok(())
    }

    /// Validates and records the release of a context served by the overflow queue.
    ///
    /// Storing the context back in the overflow queue is up to the caller.
    pub(crate) fn release_overflow(&self, id: ContextId) -> Result<()> {
        self.check_caller(id)?;

        let mut stack = self.lock();
        stack.validate_release(id)?;
        stack.complete_release();

        Ok(())
    }
}

/// A reserved stack position, filled by the owner thread without holding the stack lock.
///
/// Vacated again if dropped unfilled, for example when construction fails or panics.
pub(crate) struct Reservation<'a, C: Context> {
    slot: &'a AffinitySlot<C>,
    depth: usize,
    filled: bool,
}

impl<'a, C: Context> Reservation<'a, C> {
    /// Takes over a position that `claim()` or `reserve()` left reserved.
    pub(crate) fn new(slot: &'a AffinitySlot<C>, depth: usize) -> Self {
        Self {
            slot,
            depth,
            filled: false,
        }
    }

    pub(crate) fn check_out(mut self, id: ContextId) {
        self.slot.lock().mark_checked_out(self.depth, id);
        self.filled = true;
    }

    fn store_idle(mut self, handle: ReclaimHandle<C>) {
        self.slot.lock().store_idle(self.depth, handle);
        self.filled = true;
    }
}

impl<C: Context> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if !self.filled {
            self.slot.lock().vacate(self.depth);
        }
    }
}

/// Maps each calling thread to its context stack.
///
/// The map is only write-locked to register a thread seen for the first time and to prune
/// stacks left empty by reclaim passes. Lookups take the read lock.
pub(crate) struct AffinityRegistry<C> {
    slots: RwLock<HashMap<ThreadId, Arc<AffinitySlot<C>>>>,
}

impl<C: Context> AffinityRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn slot_for_current_thread(&self) -> Arc<AffinitySlot<C>> {
        let thread_id = thread::current().id();

        if let Some(slot) = self.slots.read().get(&thread_id) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        let slot = slots.entry(thread_id).or_insert_with(|| {
            debug!(?thread_id, "registered context stack for thread");
            Arc::new(AffinitySlot::new(thread_id))
        });

        Arc::clone(slot)
    }

    /// Runs a reclaim pass over every registered stack, then prunes stacks left unused.
    ///
    /// Stacks of threads that have exited lose all their idle contexts, whatever the retention.
    pub(crate) fn reclaim(&self, pressure: MemoryPressure) -> ReclaimReport {
        let slots = self.slots.read().values().cloned().collect::<Vec<_>>();

        let mut report = ReclaimReport::default();
        for slot in &slots {
            if slot.is_orphaned() {
                let discarded = slot.lock().discard_idle();
                debug!(
                    thread_id = ?slot.owner,
                    discarded = discarded.reclaimed(),
                    "discarded idle contexts of exited thread"
                );
                report.merge(discarded);
            } else {
                report.merge(slot.lock().reclaim(pressure));
            }
        }

        // Our clones would keep every slot looking referenced.
        drop(slots);

        self.prune();
        report
    }

    /// Removes stacks that hold nothing and are not referenced by any guard or acquisition in
    /// progress.
    ///
    /// A thread that looked up its slot just before pruning keeps using the pruned slot
    /// through its guards; its next lookup registers a fresh one.
    fn prune(&self) {
        self.slots.write().retain(|thread_id, slot| {
            let keep = Arc::strong_count(slot) > 1 || !slot.lock().is_unused();

            if !keep {
                debug!(?thread_id, "pruned empty context stack");
            }

            keep
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }
}
