//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a memo or effect runs, the read is linked
//!    to that computation.
//!
//! 2. When a signal's value changes, its version advances and every
//!    dependent is marked stale.
//!
//! 3. Effects reached by the write run before `set` returns, unless a batch
//!    is open.
//!
//! # Equality
//!
//! A write of a value equal to the current one is dropped entirely: no
//! version bump, no propagation. Equality defaults to `PartialEq` and can be
//! replaced with any comparison, or turned off with
//! [`Signal::always_notify`].

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

/// A reactive signal holding a value of type `T`.
///
/// Cloning a signal clones the handle; all clones share one value. The signal
/// lives until its last handle is dropped or it is disposed.
///
/// # Example
///
/// ```rust
/// use trellis_core::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get().unwrap(), 0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get().unwrap(), 5);
/// ```
pub struct Signal<T> {
    shared: Rc<SignalShared<T>>,
}

struct SignalShared<T> {
    id: NodeId,
    value: RefCell<T>,
    equals: fn(&T, &T) -> bool,
}

impl<T> Drop for SignalShared<T> {
    fn drop(&mut self) {
        let id = self.id;
        Runtime::try_with(|rt| rt.release_node(id));
    }
}

fn never_equal<T>(_: &T, _: &T) -> bool {
    false
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, |a, b| a == b)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal that uses `equals` to decide whether a write changes
    /// anything.
    pub fn with_equality(value: T, equals: fn(&T, &T) -> bool) -> Self {
        let id = Runtime::with(|rt| rt.create_node(NodeKind::Signal));
        Self {
            shared: Rc::new(SignalShared {
                id,
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Create a signal where every write propagates, even of an equal value.
    pub fn always_notify(value: T) -> Self {
        Self::with_equality(value, never_equal::<T>)
    }

    /// Attach a debug label used in errors and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        let label = label.into();
        Runtime::with(|rt| rt.set_label(self.shared.id, label));
        self
    }

    /// Get the signal's node id.
    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        Runtime::with(|rt| rt.observe(self.shared.id, NodeKind::Signal))?;
        let value = self.borrow()?;
        Ok(f(&value))
    }

    /// Borrow the current value without tracking the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        Runtime::with(|rt| rt.state().ensure_live(self.shared.id, NodeKind::Signal))?;
        let value = self.borrow()?;
        Ok(f(&value))
    }

    /// Replace the value.
    ///
    /// Dependents are marked stale and, outside a batch, the effects reached
    /// run before this returns. Errors from those effects are returned here.
    pub fn set(&self, value: T) -> Result<()> {
        let id = self.shared.id;
        Runtime::with(|rt| {
            rt.state().check_mutation(id, NodeKind::Signal)?;
            {
                let mut current = self
                    .shared
                    .value
                    .try_borrow_mut()
                    .map_err(|_| ReactiveError::BorrowConflict { node: id })?;
                if (self.shared.equals)(&*current, &value) {
                    return Ok(());
                }
                *current = value;
            }
            rt.signal_changed(id)
        })
    }

    /// Compute a new value from the current one and store it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = self.with_untracked(f)?;
        self.set(next)
    }

    /// Get the version, which advances on every accepted write.
    pub fn version(&self) -> Result<u64> {
        Runtime::with(|rt| rt.node_version(self.shared.id, NodeKind::Signal))
    }

    /// Dispose the signal.
    ///
    /// Dependents are unlinked and marked dirty; their next run sees
    /// `DisposedNodeAccessed` if they still read this signal.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|rt| rt.dispose_node(self.shared.id, NodeKind::Signal))
    }

    /// Check whether the signal has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.state().graph.contains(self.shared.id))
    }

    fn borrow(&self) -> Result<std::cell::Ref<'_, T>> {
        self.shared
            .value
            .try_borrow()
            .map_err(|_| ReactiveError::BorrowConflict {
                node: self.shared.id,
            })
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value, tracking the read.
    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }

    /// Get the current value without tracking the read.
    pub fn get_untracked(&self) -> Result<T> {
        self.with_untracked(T::clone)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Signal");
        out.field("id", &self.shared.id);
        match self.shared.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish()
    }
}

// ---------------- Tests ----------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_get_set() {
        let signal = Signal::new(42);
        assert_eq!(signal.get().unwrap(), 42);

        signal.set(100).unwrap();
        assert_eq!(signal.get().unwrap(), 100);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|x| x + 5).unwrap();
        assert_eq!(signal.get().unwrap(), 15);
    }

    #[test]
    fn signal_with() {
        let signal = Signal::new(String::from("hello"));
        let len = signal.with(|s| s.len()).unwrap();
        assert_eq!(len, 5);
    }

    #[test]
    fn equal_writes_do_not_bump_the_version() {
        let signal = Signal::new(1);
        signal.set(1).unwrap();
        assert_eq!(signal.version().unwrap(), 0);

        signal.set(2).unwrap();
        assert_eq!(signal.version().unwrap(), 1);
    }

    #[test]
    fn always_notify_bumps_on_equal_writes() {
        let signal = Signal::always_notify(1);
        signal.set(1).unwrap();
        signal.set(1).unwrap();
        assert_eq!(signal.version().unwrap(), 2);
    }

    #[test]
    fn custom_equality() {
        let signal = Signal::with_equality(1.0_f64, |a, b| (a - b).abs() < 0.5);
        signal.set(1.2).unwrap();
        assert_eq!(signal.get().unwrap(), 1.0);

        signal.set(2.0).unwrap();
        assert_eq!(signal.get().unwrap(), 2.0);
    }

    #[test]
    fn signal_clone_shares_value() {
        let a = Signal::new(1);
        let b = a.clone();
        a.set(2).unwrap();
        assert_eq!(b.get().unwrap(), 2);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn disposed_signal_rejects_access() {
        let signal = Signal::new(1);
        signal.dispose().unwrap();

        assert!(signal.is_disposed());
        assert!(signal.get().unwrap_err().is_disposed());
        assert!(signal.set(2).unwrap_err().is_disposed());
        assert!(signal.dispose().is_ok());
    }

    #[test]
    fn dropping_the_last_handle_releases_the_node() {
        let before = Runtime::stats().nodes;
        let signal = Signal::new(1);
        let clone = signal.clone();
        assert_eq!(Runtime::stats().nodes, before + 1);

        drop(signal);
        assert_eq!(Runtime::stats().nodes, before + 1);

        drop(clone);
        assert_eq!(Runtime::stats().nodes, before);
    }

    #[test]
    fn writing_while_borrowed_is_a_conflict() {
        let signal = Signal::always_notify(1);
        let err = signal.with(|_| signal.set(2)).unwrap().unwrap_err();
        assert!(matches!(err, ReactiveError::BorrowConflict { .. }));
    }
}
