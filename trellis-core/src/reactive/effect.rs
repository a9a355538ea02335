//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When a dependency is written, the effect is scheduled. Before it runs,
//!    the memos it read are brought up to date; if none of its dependencies
//!    actually changed value, it is skipped.
//!
//! 3. Each run tracks its dependencies afresh. Dependencies the run no
//!    longer reads are dropped.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Effects may write signals. The writes are queued behind the running
//!   effect instead of starting a nested drain.
//!
//! # Cleanup
//!
//! Effects can optionally return a [`Teardown`]. It is called before the
//! effect re-runs and when the effect is disposed. This is useful for
//! releasing resources like subscriptions or timers.
//!
//! Dropping an `Effect` handle does not stop the effect; call
//! [`Effect::dispose`] for that.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use super::runtime::Runtime;
use super::Computation;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

/// Cleanup returned by an effect run.
pub struct Teardown(Box<dyn FnOnce()>);

impl Teardown {
    /// Wrap a cleanup closure.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teardown")
    }
}

/// Values an effect body may return.
pub trait IntoTeardown {
    /// Convert into the optional cleanup for this run.
    fn into_teardown(self) -> Option<Teardown>;
}

impl IntoTeardown for () {
    fn into_teardown(self) -> Option<Teardown> {
        None
    }
}

impl IntoTeardown for Teardown {
    fn into_teardown(self) -> Option<Teardown> {
        Some(self)
    }
}

impl IntoTeardown for Option<Teardown> {
    fn into_teardown(self) -> Option<Teardown> {
        self
    }
}

/// Observable state of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    /// Up to date with its dependencies.
    Clean,
    /// Waiting in the effect queue.
    Scheduled,
    /// The body is executing.
    Running,
    /// The last run failed. The next write to a dependency retries it.
    Failed,
    /// Disposed; it will never run again.
    Disposed,
}

type RunFn = Box<dyn FnMut() -> Result<Option<Teardown>>>;

struct EffectSlot {
    id: NodeId,
    run: RefCell<RunFn>,
    teardown: RefCell<Option<Teardown>>,
    runs: Cell<usize>,
}

impl Computation for EffectSlot {
    fn compute(&self) -> Result<bool> {
        let mut run = self
            .run
            .try_borrow_mut()
            .map_err(|_| ReactiveError::BorrowConflict { node: self.id })?;
        self.runs.set(self.runs.get() + 1);
        let teardown = (*run)()?;
        drop(run);
        *self.teardown.borrow_mut() = teardown;
        Ok(true)
    }

    fn cleanup(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let effect = Effect::new({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || {
///         seen.set(count.get()?);
///         Ok(())
///     }
/// })
/// .unwrap();
///
/// count.set(5).unwrap();
/// assert_eq!(seen.get(), 5);
/// effect.dispose().unwrap();
/// ```
#[derive(Clone)]
pub struct Effect {
    id: NodeId,
    slot: Rc<EffectSlot>,
}

impl Effect {
    /// Create a new effect and run it once.
    ///
    /// If that first run fails, the effect is disposed and the error is
    /// returned.
    pub fn new<F, R>(mut run: F) -> Result<Self>
    where
        F: FnMut() -> Result<R> + 'static,
        R: IntoTeardown,
    {
        Runtime::with(|rt| {
            let id = rt.create_node(NodeKind::Effect);
            let body: RunFn = Box::new(move || run().map(IntoTeardown::into_teardown));
            let slot = Rc::new(EffectSlot {
                id,
                run: RefCell::new(body),
                teardown: RefCell::new(None),
                runs: Cell::new(0),
            });
            rt.attach(id, slot.clone());
            rt.start_effect(id)?;
            debug!(node = %id, "effect created");

            // The first run may have written signals other effects read.
            if let Err(err) = rt.drain_effects() {
                warn!(effect = %id, error = %err, "effects triggered by a new effect failed");
            }
            Ok(Self { id, slot })
        })
    }

    /// Get the effect's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.slot.runs.get()
    }

    /// Get the effect's current state.
    pub fn state(&self) -> EffectState {
        Runtime::with(|rt| {
            let state = rt.state();
            match state.graph.node(self.id) {
                None => EffectState::Disposed,
                Some(node) if node.running => EffectState::Running,
                Some(node) if node.scheduled => EffectState::Scheduled,
                Some(node) if node.errored => EffectState::Failed,
                Some(_) => EffectState::Clean,
            }
        })
    }

    /// Stop the effect: run its pending teardown and unlink its dependencies.
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|rt| rt.dispose_node(self.id, NodeKind::Effect))
    }

    /// Check whether the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state() == EffectState::Disposed
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("runs", &self.slot.runs.get())
            .finish()
    }
}

// ---------------- Tests ----------------
