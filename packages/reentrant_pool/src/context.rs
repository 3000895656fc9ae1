use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Result;

/// Default number of elements each scratch buffer is sized to at construction.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4096;

/// Default growth step of scratch buffers, in elements.
pub const DEFAULT_CAPACITY_INCREMENT: usize = 4096;

/// Per-operation scratch state that a [`ContextProvider`][crate::ContextProvider] hands out.
///
/// Contexts are expensive to construct, so the provider keeps idle ones around and reuses
/// them. The provider guarantees that a context is never used by two holders at once and
/// that [`reset()`][Self::reset] runs before a released context is handed out again.
///
/// # Example
///
/// ```
/// use reentrant_pool::{Context, ContextSizing, Result};
///
/// struct Tally {
///     seen: Vec<u32>,
/// }
///
/// impl Context for Tally {
///     fn create(sizing: &ContextSizing) -> Result<Self> {
///         let mut seen = Vec::new();
///         seen.try_reserve_exact(sizing.initial_capacity())?;
///         Ok(Self { seen })
///     }
///
///     fn reset(&mut self) {
///         self.seen.clear();
///     }
/// }
/// ```
pub trait Context: Send + 'static {
    /// Constructs a new context, sizing any scratch storage according to `sizing`.
    ///
    /// This is the only point where non-reusable resources should be sized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if scratch storage cannot be
    /// allocated, or [`Error::Creation`][crate::Error::Creation] for any other failure.
    fn create(sizing: &ContextSizing) -> Result<Self>
    where
        Self: Sized;

    /// Returns the context to a deterministic clean state, discarding all working data.
    fn reset(&mut self);
}

/// Sizing constants for the scratch storage of newly created contexts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContextSizing {
    initial_capacity: usize,
    capacity_increment: usize,
}

impl ContextSizing {
    /// Creates sizing constants.
    ///
    /// A `capacity_increment` of zero is treated as one element.
    #[must_use]
    pub const fn new(initial_capacity: usize, capacity_increment: usize) -> Self {
        Self {
            initial_capacity,
            capacity_increment: if capacity_increment == 0 {
                1
            } else {
                capacity_increment
            },
        }
    }

    /// Number of elements scratch buffers are sized to at construction.
    #[must_use]
    pub const fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    /// Step by which scratch buffers grow when more room is needed.
    #[must_use]
    pub const fn capacity_increment(&self) -> usize {
        self.capacity_increment
    }

    /// Returns the smallest capacity that holds `required` elements and is a whole number of
    /// increments above the initial capacity.
    #[must_use]
    pub fn grown_capacity(&self, required: usize) -> usize {
        if required <= self.initial_capacity {
            return self.initial_capacity;
        }

        let shortfall = required.saturating_sub(self.initial_capacity);
        let steps = shortfall.div_ceil(self.capacity_increment);

        self.initial_capacity
            .saturating_add(steps.saturating_mul(self.capacity_increment))
    }
}

impl Default for ContextSizing {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_CAPACITY_INCREMENT)
    }
}

/// Identity of a context constructed by a provider.
///
/// Identities are assigned at construction and never reused within one provider. A context
/// reclaimed while idle is replaced by a context with a new identity, so identity is not
/// stable across acquisitions.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value of the identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out context identities for one provider.
#[derive(Debug)]
pub(crate) struct ContextIdSource {
    next: AtomicU64,
}

impl ContextIdSource {
    pub(crate) const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> ContextId {
        // Relaxed is enough, uniqueness only depends on the atomicity of the increment.
        ContextId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
