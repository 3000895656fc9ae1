use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::error;

use crate::affinity::AffinitySlot;
use crate::provider::ProviderInner;
use crate::{Context, ContextId, Error};

/// Where a checked-out context came from, and therefore where it goes back to.
pub(crate) enum Origin<C> {
    /// A position in the acquiring thread's stack.
    Stack {
        slot: Arc<AffinitySlot<C>>,
        depth: usize,
    },

    /// The affinity overflow queue, used past the stack depth cap.
    Overflow { slot: Arc<AffinitySlot<C>> },

    /// The queue of a queue-backed provider.
    Shared,
}

pub(crate) struct Checkout<C> {
    pub(crate) id: ContextId,
    pub(crate) context: Box<C>,
    pub(crate) origin: Origin<C>,
}

/// A release that failed validation, with the checkout handed back unchanged.
pub(crate) struct Rejected<C> {
    pub(crate) error: Error,
    pub(crate) checkout: Checkout<C>,
}

/// A context checked out of a [`ContextProvider`][crate::ContextProvider].
///
/// Dereferences to the context. Dropping the guard releases the context back to the provider
/// it came from, so release happens on every exit path including unwinding. Use
/// [`ContextProvider::release()`][crate::ContextProvider::release] instead to observe pairing
/// errors as values.
///
/// The guard is neither [`Send`] nor [`Sync`]: a context is released by the thread that
/// acquired it.
///
/// # Panics
///
/// Dropping a guard panics if the release is rejected, which happens when nested affinity
/// acquisitions are released out of order. If the thread is already panicking, the violation
/// is logged instead and the context is discarded.
pub struct Pooled<C: Context> {
    pub(crate) provider: Arc<ProviderInner<C>>,

    // Only `None` while a release is in progress or after it completed.
    pub(crate) checkout: Option<Checkout<C>>,

    _single_threaded: PhantomData<*const ()>,
}

impl<C: Context> Pooled<C> {
    pub(crate) fn new(provider: Arc<ProviderInner<C>>, checkout: Checkout<C>) -> Self {
        Self {
            provider,
            checkout: Some(checkout),
            _single_threaded: PhantomData,
        }
    }

    fn checkout(&self) -> &Checkout<C> {
        self.checkout
            .as_ref()
            .expect("a guard always holds its checkout until released")
    }

    /// Identity of the held context.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.checkout().id
    }
}

impl<C: Context> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.checkout().context
    }
}

impl<C: Context> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self
            .checkout
            .as_mut()
            .expect("a guard always holds its checkout until released")
            .context
    }
}

impl<C: Context> fmt::Debug for Pooled<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.checkout.as_ref().map(|checkout| checkout.id))
            .finish_non_exhaustive()
    }
}

impl<C: Context> Drop for Pooled<C> {
    fn drop(&mut self) {
        let Some(checkout) = self.checkout.take() else {
            return;
        };

        let Err(Rejected { error, checkout }) = self.provider.check_in(checkout) else {
            return;
        };

        let id = checkout.id;
        self.provider.abandon(checkout);

        if thread::panicking() {
            error!(
                id = id.get(),
                %error,
                "discarded context whose release was rejected during unwinding"
            );
        } else {
            panic!("context guard dropped out of pairing: {error}");
        }
    }
}

/// A rejected [`ContextProvider::release()`][crate::ContextProvider::release].
///
/// Carries the guard back to the caller so that the context is not lost and the provider
/// stays unchanged; the caller can release it again in the correct order.
#[derive(Error)]
#[error("{error}")]
pub struct ReleaseError<C: Context> {
    error: Error,
    pooled: Pooled<C>,
}

impl<C: Context> ReleaseError<C> {
    pub(crate) fn new(error: Error, pooled: Pooled<C>) -> Self {
        Self { error, pooled }
    }

    /// Why the release was rejected.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Takes back the guard whose release was rejected.
    #[must_use]
    pub fn into_inner(self) -> Pooled<C> {
        self.pooled
    }

    /// Splits into the rejection reason and the guard.
    #[must_use]
    pub fn into_parts(self) -> (Error, Pooled<C>) {
        (self.error, self.pooled)
    }
}

impl<C: Context> fmt::Debug for ReleaseError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("error", &self.error)
            .field("pooled", &self.pooled)
            .finish()
    }
}
