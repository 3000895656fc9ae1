use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use foldhash::{HashSet, HashSetExt};
use parking_lot::Mutex;

/// Records which pooled contexts are in use at any moment and panics on the first one that is
/// in use by two holders at once.
///
/// Tests call [`enter()`][Self::enter] with the identity of each context right after acquiring
/// it and keep the returned guard for as long as they use the context.
///
/// # Example
///
/// ```rust
/// use testing::CheckoutLedger;
///
/// let ledger = CheckoutLedger::new();
///
/// let first = ledger.enter(1);
/// let second = ledger.enter(2);
/// assert_eq!(ledger.in_use(), 2);
///
/// drop(first);
/// let _again = ledger.enter(1);
/// # drop(second);
/// ```
#[derive(Default)]
pub struct CheckoutLedger {
    in_use: Mutex<HashSet<u64>>,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl CheckoutLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_use: Mutex::new(HashSet::new()),
            peak: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    /// Marks the context `id` as in use until the returned guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already in use.
    #[must_use]
    pub fn enter(&self, id: u64) -> LedgerEntry<'_> {
        let mut in_use = self.in_use.lock();

        assert!(
            in_use.insert(id),
            "context {id} handed to a second holder while still in use"
        );

        self.peak.fetch_max(in_use.len(), Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);

        LedgerEntry { ledger: self, id }
    }

    /// Number of contexts in use right now.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.lock().len()
    }

    /// Highest number of contexts that were in use at the same time.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Number of times any context was entered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CheckoutLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("in_use", &self.in_use())
            .field("peak", &self.peak())
            .field("total", &self.total())
            .finish()
    }
}

/// Marks one context as in use. Dropping it marks the context free again.
#[derive(Debug)]
pub struct LedgerEntry<'a> {
    ledger: &'a CheckoutLedger,
    id: u64,
}

impl Drop for LedgerEntry<'_> {
    fn drop(&mut self) {
        self.ledger.in_use.lock().remove(&self.id);
    }
}
