//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked pending.
//!
//! 4. On next access, the memo re-checks if inputs actually changed.
//!
//! 5. If inputs changed, recompute. Otherwise, mark clean and return cache.
//!
//! # Why This Matters
//!
//! This lazy approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay pending (no wasted work)
//!
//! A recomputation that yields an equal value leaves the memo's version
//! alone, so memos and effects downstream see no change and do not run.
//!
//! # Restrictions
//!
//! The computation must not write signals or dispose nodes; doing so fails
//! with `WriteDuringCompute`. A memo that reads itself, directly or through
//! other memos, fails with `CyclicDependency`.

use std::borrow::Cow;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use super::Computation;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind, NodeState};

/// A cached derived value.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Memo::new({
///     let count = count.clone();
///     move || Ok(count.get()? * 2)
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Memo<T: 'static> {
    shared: Rc<MemoShared<T>>,
}

struct MemoShared<T: 'static> {
    id: NodeId,
    slot: Rc<MemoSlot<T>>,
}

impl<T: 'static> Drop for MemoShared<T> {
    fn drop(&mut self) {
        let id = self.id;
        Runtime::try_with(|rt| rt.release_node(id));
    }
}

/// The part of a memo the runtime calls into.
struct MemoSlot<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> Result<T>>,
    value: RefCell<Option<T>>,
    equals: fn(&T, &T) -> bool,
}

impl<T> Computation for MemoSlot<T> {
    fn compute(&self) -> Result<bool> {
        let next = (self.compute)()?;
        let mut value = self
            .value
            .try_borrow_mut()
            .map_err(|_| ReactiveError::BorrowConflict { node: self.id })?;
        match value.as_ref() {
            Some(previous) if (self.equals)(previous, &next) => Ok(false),
            _ => {
                *value = Some(next);
                Ok(true)
            }
        }
    }
}

impl<T: PartialEq + 'static> Memo<T> {
    /// Create a new memo with the given computation.
    ///
    /// The computation does not run until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_equality(compute, |a, b| a == b)
    }
}

impl<T: 'static> Memo<T> {
    /// Create a memo that uses `equals` to decide whether a recomputation
    /// produced a new value.
    pub fn with_equality<F>(compute: F, equals: fn(&T, &T) -> bool) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Runtime::with(|rt| {
            let id = rt.create_node(NodeKind::Memo);
            let slot = Rc::new(MemoSlot {
                id,
                compute: Box::new(compute),
                value: RefCell::new(None),
                equals,
            });
            rt.attach(id, slot.clone());
            Self {
                shared: Rc::new(MemoShared { id, slot }),
            }
        })
    }

    /// Attach a debug label used in errors and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        let label = label.into();
        Runtime::with(|rt| rt.set_label(self.shared.id, label));
        self
    }

    /// Get the memo's node id.
    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Borrow the value, recomputing first if needed. Tracks the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let id = self.shared.id;
        Runtime::with(|rt| {
            rt.update_memo(id)?;
            rt.observe(id, NodeKind::Memo)
        })?;
        let value = self.borrow()?;
        Ok(f(&value))
    }

    /// Borrow the value, recomputing first if needed, without tracking the
    /// read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        Runtime::with(|rt| rt.update_memo(self.shared.id))?;
        let value = self.borrow()?;
        Ok(f(&value))
    }

    /// Get the staleness state without bringing the memo up to date.
    pub fn state(&self) -> Result<NodeState> {
        Runtime::with(|rt| rt.node_state(self.shared.id, NodeKind::Memo))
    }

    /// Get the version, which advances every time a recomputation produces a
    /// new value.
    pub fn version(&self) -> Result<u64> {
        Runtime::with(|rt| rt.node_version(self.shared.id, NodeKind::Memo))
    }

    /// Dispose the memo.
    ///
    /// Dependencies are unlinked. Dependents are unlinked and marked dirty;
    /// their next run sees `DisposedNodeAccessed` if they still read this
    /// memo.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|rt| rt.dispose_node(self.shared.id, NodeKind::Memo))
    }

    /// Check whether the memo has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.state().graph.contains(self.shared.id))
    }

    fn borrow(&self) -> Result<Ref<'_, T>> {
        let value = self
            .shared
            .slot
            .value
            .try_borrow()
            .map_err(|_| ReactiveError::BorrowConflict {
                node: self.shared.id,
            })?;
        Ref::filter_map(value, Option::as_ref)
            .map_err(|_| ReactiveError::disposed(self.shared.id, NodeKind::Memo))
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Get the value, recomputing first if needed. Tracks the read.
    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }

    /// Get the value, recomputing first if needed, without tracking the read.
    pub fn get_untracked(&self) -> Result<T> {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Memo");
        out.field("id", &self.shared.id);
        match self.shared.slot.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish()
    }
}

// ---------------- Tests ----------------
