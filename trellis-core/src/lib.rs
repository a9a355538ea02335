//! Trellis Core
//!
//! This crate provides a fine-grained reactive dependency engine.
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Push/pull change propagation with glitch-free, lazy memos
//! - Batched, deduplicated effect scheduling
//!
//! Writes reach exactly the dependents whose value could have changed, and
//! each memo recomputes at most once per update.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Signals, memos, effects and the per-thread runtime
//! - `graph`: Node and edge arenas plus the effect queue
//! - `error`: The error type shared by every operation
//! - `config`: Runtime tunables
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::{Effect, Memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(1);
//!
//! // Create a derived value
//! let doubled = Memo::new({
//!     let count = count.clone();
//!     move || Ok(count.get()? * 2)
//! });
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = Effect::new({
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || {
//!         log.borrow_mut().push((count.get()?, doubled.get()?));
//!         Ok(())
//!     }
//! })
//! .unwrap();
//!
//! // Update the signal: the effect runs before `set` returns
//! count.set(5).unwrap();
//! assert_eq!(*log.borrow(), vec![(1, 2), (5, 10)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{ConfigError, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use graph::{NodeId, NodeKind, NodeState};
pub use reactive::{
    batch, untrack, Effect, EffectState, IntoTeardown, Memo, Runtime, RuntimeStats, Signal,
    Teardown,
};
