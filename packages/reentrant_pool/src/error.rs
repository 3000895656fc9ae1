use std::collections::TryReserveError;

use thiserror::Error;

use crate::ContextId;

/// Errors returned by [`ContextProvider`][crate::ContextProvider] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Scratch storage for a new context could not be allocated.
    ///
    /// The provider is left unchanged when this is returned from `acquire()`.
    #[error("failed to allocate scratch storage for a new context")]
    Allocation(#[from] TryReserveError),

    /// A custom context type failed to construct itself for a reason other than allocation.
    #[error("failed to create a new context")]
    Creation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The released context was checked out from a different provider.
    #[error("context {id} was not acquired from this provider")]
    ForeignContext {
        /// Identity of the rejected context.
        id: ContextId,
    },

    /// The releasing thread does not hold the context it tried to release.
    #[error("context {id} is not checked out by the releasing thread")]
    NotHeldByCaller {
        /// Identity of the rejected context.
        id: ContextId,
    },

    /// Nested acquisitions on the same thread must be released in reverse order.
    #[error("context {actual} released out of order: context {expected} must be released first")]
    OutOfOrderRelease {
        /// The most recent acquisition on this thread, which must be released next.
        expected: ContextId,

        /// The context the caller attempted to release.
        actual: ContextId,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_error_converts_from_try_reserve() {
        let reserve_error = Vec::<u64>::new().try_reserve_exact(usize::MAX).unwrap_err();

        let error: Error = reserve_error.into();

        assert!(matches!(error, Error::Allocation(_)));
    }

    #[test]
    fn out_of_order_message_names_both_contexts() {
        let error = Error::OutOfOrderRelease {
            expected: ContextId::new(7),
            actual: ContextId::new(3),
        };

        let message = error.to_string();
        assert!(message.contains("context 3"));
        assert!(message.contains("context 7"));
    }
}
