//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a memo or effect is running, the signal automatically registers that
//! computation as a dependent. When the signal's value changes, dependents are
//! marked stale.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates lazily,
//! on read, and only when one of its dependencies really changed. A memo that
//! recomputes to an equal value does not disturb its own dependents.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with the outside
//! world. They may write signals; memos may not.
//!
//! # Implementation Notes
//!
//! The runtime keeps a stack of running computations. When a signal or memo
//! is read, it is linked to the computation on top of that stack. The links
//! are rebuilt on every run, so dependencies that are only read on some
//! branches are dropped as soon as a run stops reading them.

mod context;
mod effect;
mod memo;
mod propagate;
mod runtime;
mod signal;

pub use effect::{Effect, EffectState, IntoTeardown, Teardown};
pub use memo::Memo;
pub use runtime::{batch, untrack, Runtime, RuntimeStats};
pub use signal::Signal;

use crate::error::Result;

/// The body of a memo or effect, as seen by the runtime.
pub(crate) trait Computation {
    /// Run the body under the current tracking frame. Returns whether the
    /// observable value changed.
    fn compute(&self) -> Result<bool>;

    /// Release whatever the previous run left behind.
    fn cleanup(&self) {}
}
