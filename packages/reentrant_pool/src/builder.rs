use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::time::Duration;

use crate::{BackingMode, Context, ContextProvider, ContextSizing, PoolConfig, Retention};

/// Builder for a [`ContextProvider`].
///
/// Starts from [`PoolConfig::default()`]. Individual setters override one value each; use
/// [`config()`][Self::config] to start from a loaded configuration instead.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use reentrant_pool::{BackingMode, ContextProvider, PoolConfig, Retention, ScratchContext};
///
/// let provider = ContextProvider::<ScratchContext>::builder()
///     .config(PoolConfig::from_env())
///     .backing(BackingMode::Queue)
///     .retention(Retention::Always)
///     .max_affinity_depth(NonZero::new(2).unwrap())
///     .build();
///
/// assert_eq!(provider.config().backing(), BackingMode::Queue);
/// ```
#[must_use]
pub struct ContextProviderBuilder<C: Context> {
    config: PoolConfig,

    _context: PhantomData<fn() -> C>,

    // Thread-mobile but not thread-safe, like the other builders.
    _not_sync: PhantomData<Cell<()>>,
}

impl<C: Context> ContextProviderBuilder<C> {
    pub(crate) fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            _context: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Replaces the whole configuration, discarding values set so far.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where idle contexts are kept.
    pub fn backing(mut self, backing: BackingMode) -> Self {
        self.config.backing = backing;
        self
    }

    /// Sets how strongly idle contexts are held.
    pub fn retention(mut self, retention: Retention) -> Self {
        self.config.retention = retention;
        self
    }

    /// Sets the sizing constants passed to [`Context::create()`].
    pub fn sizing(mut self, sizing: ContextSizing) -> Self {
        self.config.sizing = sizing;
        self
    }

    /// Sets how deep a thread's context stack may grow before nested acquisitions overflow to a
    /// shared queue. Only meaningful for [`BackingMode::Affinity`].
    pub fn max_affinity_depth(mut self, depth: NonZero<usize>) -> Self {
        self.config.max_affinity_depth = depth;
        self
    }

    /// Sets how long a [`Retention::Minimal`] context may stay idle before it expires.
    pub fn minimal_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.minimal_idle_timeout = timeout;
        self
    }

    /// Enables the background sweeper, which runs a routine reclaim pass every `interval`.
    ///
    /// A zero interval disables it.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Sets whether the provider's settings are logged on its first use.
    pub fn log_settings(mut self, enabled: bool) -> Self {
        self.config.log_settings = enabled;
        self
    }

    /// Builds the provider. No context is constructed until the first acquisition.
    #[must_use]
    pub fn build(self) -> ContextProvider<C> {
        ContextProvider::from_config(self.config)
    }
}

impl<C: Context> fmt::Debug for ContextProviderBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("config", &self.config)
            .finish()
    }
}
