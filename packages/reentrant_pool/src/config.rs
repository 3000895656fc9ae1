use std::env;
use std::fmt;
use std::num::NonZero;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::diagnostics::OnceLatch;
use crate::{ContextSizing, Retention, UnknownVariant};

const DEFAULT_MAX_AFFINITY_DEPTH: NonZero<usize> = NonZero::new(4).expect("4 is not zero");
const DEFAULT_MINIMAL_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a provider keeps its idle contexts.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum BackingMode {
    /// One stack of contexts per calling thread, found through a registry keyed by thread.
    ///
    /// Callers on different threads never contend with each other. Nested acquisitions on one
    /// thread use successive entries of that thread's stack. This is the default.
    #[default]
    Affinity,

    /// One shared lock-free queue of contexts, usable from any thread.
    ///
    /// Suitable when the number of calling threads is unbounded or short-lived, where
    /// per-thread stacks would accumulate.
    Queue,
}

impl fmt::Display for BackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Affinity => "affinity",
            Self::Queue => "queue",
        })
    }
}

impl FromStr for BackingMode {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "affinity" | "thread_local" | "thread" => Ok(Self::Affinity),
            "queue" | "shared" => Ok(Self::Queue),
            _ => Err(UnknownVariant::new(value)),
        }
    }
}

/// Configuration of a [`ContextProvider`][crate::ContextProvider], read once when the provider
/// is built.
///
/// Start from [`PoolConfig::default()`], load from a property source with
/// [`PoolConfig::from_properties()`] / [`PoolConfig::from_env()`], or set individual values on
/// [`ContextProviderBuilder`][crate::ContextProviderBuilder].
///
/// # Property keys
///
/// | Key | Value | Default |
/// |-----|-------|---------|
/// | `REENTRANT_POOL_BACKING` | `affinity` or `queue` | `affinity` |
/// | `REENTRANT_POOL_RETENTION` | `always`, `available` or `minimal` | `available` |
/// | `REENTRANT_POOL_INITIAL_CAPACITY` | elements | 4096 |
/// | `REENTRANT_POOL_CAPACITY_INCREMENT` | elements | 4096 |
/// | `REENTRANT_POOL_MAX_AFFINITY_DEPTH` | nonzero count | 4 |
/// | `REENTRANT_POOL_MINIMAL_IDLE_TIMEOUT_MS` | milliseconds | 1000 |
/// | `REENTRANT_POOL_SWEEP_INTERVAL_MS` | milliseconds, 0 disables | disabled |
/// | `REENTRANT_POOL_LOG_SETTINGS` | `true` or `false` | `true` |
///
/// Values that cannot be parsed fall back to the default for that key. Each key's fallback is
/// logged as a warning once per process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolConfig {
    pub(crate) backing: BackingMode,
    pub(crate) retention: Retention,
    pub(crate) sizing: ContextSizing,
    pub(crate) max_affinity_depth: NonZero<usize>,
    pub(crate) minimal_idle_timeout: Duration,
    pub(crate) sweep_interval: Option<Duration>,
    pub(crate) log_settings: bool,
}

impl PoolConfig {
    /// Loads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_properties(|key| env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key/value property source.
    ///
    /// # Example
    ///
    /// ```
    /// use reentrant_pool::{BackingMode, PoolConfig, Retention};
    ///
    /// let config = PoolConfig::from_properties(|key| match key {
    ///     "REENTRANT_POOL_BACKING" => Some("queue".to_string()),
    ///     "REENTRANT_POOL_RETENTION" => Some("weak".to_string()),
    ///     _ => None,
    /// });
    ///
    /// assert_eq!(config.backing(), BackingMode::Queue);
    /// assert_eq!(config.retention(), Retention::Minimal);
    /// ```
    #[must_use]
    pub fn from_properties(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let initial_capacity = INITIAL_CAPACITY.read(&lookup, defaults.sizing.initial_capacity());
        let capacity_increment =
            CAPACITY_INCREMENT.read(&lookup, defaults.sizing.capacity_increment());

        let sweep_interval_ms = SWEEP_INTERVAL_MS.read(&lookup, 0_u64);
        let minimal_idle_timeout_ms = MINIMAL_IDLE_TIMEOUT_MS.read(
            &lookup,
            u64::try_from(defaults.minimal_idle_timeout.as_millis()).unwrap_or(u64::MAX),
        );

        Self {
            backing: BACKING.read(&lookup, defaults.backing),
            retention: RETENTION.read(&lookup, defaults.retention),
            sizing: ContextSizing::new(initial_capacity, capacity_increment),
            max_affinity_depth: MAX_AFFINITY_DEPTH.read(&lookup, defaults.max_affinity_depth),
            minimal_idle_timeout: Duration::from_millis(minimal_idle_timeout_ms),
            sweep_interval: (sweep_interval_ms > 0).then(|| Duration::from_millis(sweep_interval_ms)),
            log_settings: LOG_SETTINGS.read(&lookup, defaults.log_settings),
        }
    }

    /// Where idle contexts are kept.
    #[must_use]
    pub fn backing(&self) -> BackingMode {
        self.backing
    }

    /// How strongly idle contexts are held.
    #[must_use]
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Sizing constants passed to [`Context::create()`][crate::Context::create].
    #[must_use]
    pub fn sizing(&self) -> ContextSizing {
        self.sizing
    }

    /// Maximum depth of a thread's context stack in [`BackingMode::Affinity`].
    ///
    /// Nested acquisitions past this depth are served from a shared overflow queue.
    #[must_use]
    pub fn max_affinity_depth(&self) -> NonZero<usize> {
        self.max_affinity_depth
    }

    /// How long a [`Retention::Minimal`] context may stay idle before it expires on its own.
    #[must_use]
    pub fn minimal_idle_timeout(&self) -> Duration {
        self.minimal_idle_timeout
    }

    /// Interval of the background sweeper, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    /// Whether the settings are logged on first use.
    #[must_use]
    pub fn log_settings(&self) -> bool {
        self.log_settings
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backing: BackingMode::default(),
            retention: Retention::default(),
            sizing: ContextSizing::default(),
            max_affinity_depth: DEFAULT_MAX_AFFINITY_DEPTH,
            minimal_idle_timeout: DEFAULT_MINIMAL_IDLE_TIMEOUT,
            sweep_interval: None,
            log_settings: true,
        }
    }
}

/// A configuration key and the latch that limits its fallback warning to once per process.
struct Property {
    key: &'static str,
    fallback_logged: OnceLatch,
}

impl Property {
    const fn new(key: &'static str) -> Self {
        Self {
            key,
            fallback_logged: OnceLatch::new(),
        }
    }

    fn read<T>(&self, lookup: impl Fn(&str) -> Option<String>, default: T) -> T
    where
        T: FromStr + fmt::Debug,
        T::Err: fmt::Display,
    {
        let Some(raw) = lookup(self.key) else {
            return default;
        };

        match raw.trim().parse() {
            Ok(value) => value,
            Err(error) => {
                if self.fallback_logged.try_fire() {
                    warn!(
                        key = self.key,
                        value = %raw,
                        %error,
                        fallback = ?default,
                        "unrecognized configuration value, using default"
                    );
                }

                default
            }
        }
    }
}

static BACKING: Property = Property::new("REENTRANT_POOL_BACKING");
static RETENTION: Property = Property::new("REENTRANT_POOL_RETENTION");
static INITIAL_CAPACITY: Property = Property::new("REENTRANT_POOL_INITIAL_CAPACITY");
static CAPACITY_INCREMENT: Property = Property::new("REENTRANT_POOL_CAPACITY_INCREMENT");
static MAX_AFFINITY_DEPTH: Property = Property::new("REENTRANT_POOL_MAX_AFFINITY_DEPTH");
static MINIMAL_IDLE_TIMEOUT_MS: Property = Property::new("REENTRANT_POOL_MINIMAL_IDLE_TIMEOUT_MS");
static SWEEP_INTERVAL_MS: Property = Property::new("REENTRANT_POOL_SWEEP_INTERVAL_MS");
static LOG_SETTINGS: Property = Property::new("REENTRANT_POOL_LOG_SETTINGS");
