use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How strongly a provider holds on to idle contexts.
///
/// Selected once when the provider is built and fixed for its lifetime.
///
/// There is no runtime memory-pressure signal to hook into, so idle contexts are only ever
/// reclaimed by explicit reclaim passes ([`ContextProvider::reclaim()`]), either called by the
/// application when it detects memory pressure or by the provider's background sweeper.
///
/// [`ContextProvider::reclaim()`]: crate::ContextProvider::reclaim
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Retention {
    /// Idle contexts are never reclaimed.
    Always,

    /// Idle contexts are reclaimed by passes at [`MemoryPressure::Moderate`] or higher.
    ///
    /// This is the default.
    #[default]
    WhileMemoryAvailable,

    /// Idle contexts are reclaimed by every pass, even without memory pressure, and expire on
    /// their own once idle for longer than the provider's minimal idle timeout.
    ///
    /// Trades allocation churn for a lower memory peak.
    Minimal,
}

impl Retention {
    /// Whether a reclaim pass at the given pressure may void an idle context held with this
    /// retention strength.
    #[must_use]
    pub fn reclaims_at(self, pressure: MemoryPressure) -> bool {
        match self {
            Self::Always => false,
            Self::WhileMemoryAvailable => pressure >= MemoryPressure::Moderate,
            Self::Minimal => true,
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::WhileMemoryAvailable => "available",
            Self::Minimal => "minimal",
        })
    }
}

impl FromStr for Retention {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" | "hard" | "strong" => Ok(Self::Always),
            "available" | "soft" => Ok(Self::WhileMemoryAvailable),
            "minimal" | "weak" => Ok(Self::Minimal),
            _ => Err(UnknownVariant::new(value)),
        }
    }
}

/// Severity of memory pressure passed to a reclaim pass.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum MemoryPressure {
    /// Routine sweep. Only [`Retention::Minimal`] contexts are reclaimed.
    #[default]
    None,

    /// Memory is getting scarce. [`Retention::WhileMemoryAvailable`] contexts are reclaimed too.
    Moderate,

    /// Memory is critically scarce. Reclaims the same contexts as [`Self::Moderate`];
    /// [`Retention::Always`] contexts still survive.
    Severe,
}

/// A configuration value did not name any known variant.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("'{value}' is not a recognized value")]
pub struct UnknownVariant {
    value: String,
}

impl UnknownVariant {
    pub(crate) fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }

    /// The value that was not recognized.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}
