#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Reentrant provider of reusable, expensive-to-construct scratch contexts.
//!
//! Some operations need a large block of scratch state (buffers, tables, working arrays) that is
//! costly to construct but cheap to reset. A [`ContextProvider`] keeps idle contexts around
//! between uses, hands each caller a context that nobody else is using, and resets it when it
//! comes back.
//!
//! # Quick start
//!
//! ```rust
//! use reentrant_pool::{ContextProvider, ScratchContext};
//!
//! let provider = ContextProvider::<ScratchContext>::new();
//!
//! let mut context = provider.acquire()?;
//! context.push_crossing(7);
//! context.push_crossing(3);
//! context.sort_crossings();
//! assert_eq!(context.crossings(), &[3, 7]);
//!
//! // Dropping the guard releases the context, resetting it.
//! drop(context);
//!
//! let context = provider.acquire()?;
//! assert!(context.is_clean());
//! # Ok::<(), reentrant_pool::Error>(())
//! ```
//!
//! # Key features
//!
//! - **Reentrancy**: A thread that already holds a context can acquire another one, for example
//!   when a rendering callback starts a nested rendering operation. Nested acquisitions always get
//!   an independent context.
//! - **Two backings**: [`BackingMode::Affinity`] keeps a stack of contexts per calling thread
//!   so threads never contend with each other; [`BackingMode::Queue`] keeps one shared lock-free
//!   queue for workloads with many short-lived threads.
//! - **Retention strength**: [`Retention`] controls how readily idle contexts are given up when
//!   [`ContextProvider::reclaim()`] is called under [`MemoryPressure`], or by the optional
//!   background sweeper.
//! - **Configuration**: Settings come from a builder, from [`PoolConfig::from_env()`] or from any
//!   property source. Unrecognized values fall back to defaults with a one-time warning.
//!
//! # Release pairing
//!
//! Every acquisition must be released exactly once. The [`Pooled`] guard releases on drop, on
//! every exit path. In affinity mode, nested acquisitions on one thread must be released in
//! reverse order. [`ContextProvider::release()`] reports violations as [`ReleaseError`] values
//! and leaves the provider unchanged; dropping a guard out of order panics.
//!
//! # Observability
//!
//! The crate logs through [`tracing`]. The first provider to be used in the process logs its
//! settings once, at `info` level with target `reentrant_pool::settings`. Acquire and release
//! activity is logged at `trace` level, context construction and reclaim passes at `debug`.
//!
//! Counters are exposed through [`ContextProvider::stats()`] and as `nm` events named
//! `reentrant_pool_*`.

mod affinity;
mod builder;
mod config;
mod context;
mod diagnostics;
mod error;
mod metrics;
mod pooled;
mod provider;
mod reclaim_handle;
mod retention;
mod scratch;
mod shared_queue;
mod sweeper;

pub use builder::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use pooled::*;
pub use provider::*;
pub use retention::*;
pub use scratch::*;
