//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph, the reactive context stack and the
//! effect queue of the current thread.
//!
//! # How It Works
//!
//! 1. Creating a signal, memo or effect inserts a node into the graph.
//!
//! 2. When a memo or effect reads a signal or memo, the runtime links the
//!    two with an edge (see [`propagate`](super::propagate)).
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks dependent memos as pending, transitively
//!    b. Schedules the effects it reaches
//!    c. Drains the effect queue unless a batch is open
//!    d. Leaves memos alone: they are brought up to date on the next read
//!
//! # Thread Model
//!
//! There is one runtime per thread, held in thread-local storage. Handles are
//! `!Send`, so a graph is only ever touched by the thread that built it and
//! every test thread gets an isolated graph.
//!
//! The mutable state sits in a single `RefCell`. It is borrowed for short
//! bookkeeping steps only and never while user code runs, so callbacks are
//! free to read, write, create and dispose nodes.

use std::borrow::Cow;
use std::cell::{RefCell, RefMut};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, trace};

use super::context::{ContextStack, Frame, FrameGuard};
use super::Computation;
use crate::config::{ConfigError, RuntimeConfig};
use crate::error::{ReactiveError, Result};
use crate::graph::{EffectQueue, Graph, NodeId, NodeKind, NodeState};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Counters describing the current thread's graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Live signals, memos and effects.
    pub nodes: usize,
    /// Live dependency edges.
    pub edges: usize,
    /// Effects waiting in the queue.
    pub queued_effects: usize,
    /// Current batch nesting depth.
    pub batch_depth: usize,
}

/// The reactive runtime of one thread.
///
/// All public entry points are associated functions that operate on the
/// calling thread's runtime.
pub struct Runtime {
    state: RefCell<State>,
    config: RefCell<RuntimeConfig>,
}

/// Bookkeeping guarded by the runtime's `RefCell`.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) graph: Graph,
    pub(crate) context: ContextStack,
    pub(crate) queue: EffectQueue,
    epoch: u64,
}

impl State {
    /// Identifier for a new recomputation pass.
    pub(crate) fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Human-readable name of a node for errors and logs.
    pub(crate) fn describe(&self, id: NodeId) -> String {
        match self.graph.node(id) {
            Some(node) => match &node.label {
                Some(label) => label.to_string(),
                None => format!("{} {}", node.kind, id),
            },
            None => id.to_string(),
        }
    }

    /// Build the error for a read of `id` while it is already updating.
    pub(crate) fn cycle_error(&self, id: NodeId) -> ReactiveError {
        let mut path: Vec<String> = self
            .context
            .update_path_from(id)
            .iter()
            .map(|node| self.describe(*node))
            .collect();
        path.push(self.describe(id));
        ReactiveError::CyclicDependency { path }
    }

    /// Fail unless `id` is live.
    pub(crate) fn ensure_live(&self, id: NodeId, kind: NodeKind) -> Result<()> {
        if self.graph.contains(id) {
            Ok(())
        } else {
            Err(ReactiveError::disposed(id, kind))
        }
    }

    /// Fail unless `id` is live and no memo is computing.
    pub(crate) fn check_mutation(&self, id: NodeId, kind: NodeKind) -> Result<()> {
        self.ensure_live(id, kind)?;
        match self.context.computing_memo() {
            Some(memo) => Err(ReactiveError::WriteDuringCompute { node: memo }),
            None => Ok(()),
        }
    }

    /// Unlink every edge of `id`, invalidate its subscribers and remove it.
    ///
    /// Returns the node's computation so the caller can run its cleanup and
    /// drop it once the state is no longer borrowed.
    fn release(&mut self, id: NodeId) -> Option<Rc<dyn Computation>> {
        let kind = self.graph.node(id)?.kind;

        for edge in self.graph.dependency_edges(id) {
            self.unlink_edge(edge);
        }
        for edge in self.graph.subscriber_edges(id) {
            let consumer = self.graph.edge(edge).consumer;
            self.unlink_edge(edge);
            self.invalidate(consumer);
        }

        let mut node = self.graph.remove(id)?;
        debug!(node = %id, %kind, "released node");
        node.computation.take()
    }
}

impl Runtime {
    fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    /// Run `f` with the current thread's runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Like [`Runtime::with`], but returns `None` while the thread-local is
    /// being torn down.
    pub(crate) fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        RUNTIME.try_with(f).ok()
    }

    pub(crate) fn state(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    pub(crate) fn try_state(&self) -> Option<RefMut<'_, State>> {
        self.state.try_borrow_mut().ok()
    }

    // ---------------- Public API ----------------

    /// Run `f` as a batch.
    ///
    /// Writes inside the batch mark dependents stale immediately, but queued
    /// effects only run once the outermost batch closes. Batches nest.
    pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
        Runtime::with(|rt| {
            let guard = BatchGuard::enter(rt);
            let output = f();
            let drained = if guard.exit() {
                rt.drain_effects()
            } else {
                Ok(())
            };
            let value = output?;
            drained?;
            Ok(value)
        })
    }

    /// Run `f` without tracking any reads it performs.
    pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
        Runtime::with(|rt| {
            let frame = FrameGuard::enter(rt, Frame::untracked());
            let output = f();
            frame.finish();
            output
        })
    }

    /// Run any effects still waiting in the queue.
    ///
    /// Writes outside a batch drain the queue on their own, so this is only
    /// needed after a drain was cut short or deferred.
    pub fn flush() -> Result<()> {
        Runtime::with(|rt| rt.drain_effects())
    }

    /// Install a configuration for the current thread.
    pub fn configure(config: RuntimeConfig) -> std::result::Result<(), ConfigError> {
        config.validate()?;
        debug!(?config, "runtime configured");
        Runtime::with(|rt| *rt.config.borrow_mut() = config);
        Ok(())
    }

    /// Get the configuration of the current thread.
    pub fn config() -> RuntimeConfig {
        Runtime::with(|rt| rt.config.borrow().clone())
    }

    /// Get counters for the current thread's graph.
    pub fn stats() -> RuntimeStats {
        Runtime::with(|rt| {
            let state = rt.state();
            RuntimeStats {
                nodes: state.graph.node_count(),
                edges: state.graph.edge_count(),
                queued_effects: state.queue.len(),
                batch_depth: state.queue.batch_depth(),
            }
        })
    }

    // ---------------- Node lifecycle ----------------

    pub(crate) fn create_node(&self, kind: NodeKind) -> NodeId {
        let id = self.state().graph.insert(kind, None);
        trace!(node = %id, %kind, "created node");
        id
    }

    pub(crate) fn attach(&self, id: NodeId, computation: Rc<dyn Computation>) {
        if let Some(node) = self.state().graph.node_mut(id) {
            node.computation = Some(computation);
        }
    }

    pub(crate) fn set_label(&self, id: NodeId, label: Cow<'static, str>) {
        if let Some(node) = self.state().graph.node_mut(id) {
            node.label = Some(label);
        }
    }

    pub(crate) fn node_state(&self, id: NodeId, kind: NodeKind) -> Result<NodeState> {
        self.state()
            .graph
            .node(id)
            .map(|node| node.state)
            .ok_or_else(|| ReactiveError::disposed(id, kind))
    }

    pub(crate) fn node_version(&self, id: NodeId, kind: NodeKind) -> Result<u64> {
        self.state()
            .graph
            .node(id)
            .map(|node| node.version)
            .ok_or_else(|| ReactiveError::disposed(id, kind))
    }

    /// Record a read of `producer` by the current consumer.
    pub(crate) fn observe(&self, producer: NodeId, kind: NodeKind) -> Result<()> {
        let mut state = self.state();
        state.ensure_live(producer, kind)?;
        state.track_read(producer);
        Ok(())
    }

    /// A signal's value was replaced: bump its version, notify dependents
    /// and drain the queue when no batch is open.
    pub(crate) fn signal_changed(&self, id: NodeId) -> Result<()> {
        {
            let mut state = self.state();
            let Some(node) = state.graph.node_mut(id) else {
                return Err(ReactiveError::disposed(id, NodeKind::Signal));
            };
            node.version += 1;
            trace!(node = %id, version = node.version, "signal changed");
            state.push(id);
        }
        self.drain_effects()
    }

    /// Dispose a node on behalf of its handle.
    ///
    /// Disposing an already disposed node is a no-op.
    pub(crate) fn dispose_node(&self, id: NodeId, kind: NodeKind) -> Result<()> {
        {
            let state = self.state();
            if !state.graph.contains(id) {
                return Ok(());
            }
            state.check_mutation(id, kind)?;
        }
        self.release_node(id);
        self.drain_effects()
    }

    /// Remove a node without touching the queue. Also the drop path of
    /// signal and memo handles, so it never fails.
    pub(crate) fn release_node(&self, id: NodeId) {
        let computation = match self.try_state() {
            Some(mut state) => state.release(id),
            None => return,
        };
        if let Some(computation) = computation {
            computation.cleanup();
        }
    }

    /// Run the first pass of a freshly created effect.
    ///
    /// On failure the effect is released before the error is returned.
    pub(crate) fn start_effect(&self, id: NodeId) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_effect(id))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.release_node(id);
                Err(err)
            }
            Err(payload) => {
                self.release_node(id);
                panic::resume_unwind(payload)
            }
        }
    }

    pub(crate) fn current_config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }
}

/// Guard that closes a batch when dropped.
struct BatchGuard<'rt> {
    runtime: &'rt Runtime,
    active: bool,
}

impl<'rt> BatchGuard<'rt> {
    fn enter(runtime: &'rt Runtime) -> Self {
        runtime.state().queue.enter_batch();
        Self {
            runtime,
            active: true,
        }
    }

    /// Close the batch. Returns `true` if it was the outermost one.
    fn exit(mut self) -> bool {
        self.active = false;
        self.runtime.state().queue.exit_batch()
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(mut state) = self.runtime.try_state() {
            state.queue.exit_batch();
        }
    }
}

/// Run `f` as a batch on the current thread's runtime.
pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    Runtime::batch(f)
}

/// Run `f` without tracking any reads it performs.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::untrack(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_rejects_invalid_settings() {
        let config = RuntimeConfig {
            max_effect_runs_per_flush: 0,
            ..RuntimeConfig::default()
        };
        assert!(Runtime::configure(config).is_err());
        assert_eq!(Runtime::config(), RuntimeConfig::default());
    }

    #[test]
    fn configure_is_per_thread() {
        let config = RuntimeConfig {
            max_effect_runs_per_flush: 5,
            isolate_effect_panics: false,
        };
        Runtime::configure(config.clone()).unwrap();
        assert_eq!(Runtime::config(), config);

        let other = std::thread::spawn(Runtime::config).join().unwrap();
        assert_eq!(other, RuntimeConfig::default());
    }

    #[test]
    fn nested_batches_track_depth() {
        let depth = batch(|| {
            batch(|| Ok(Runtime::stats().batch_depth))
        })
        .unwrap();
        assert_eq!(depth, 2);
        assert_eq!(Runtime::stats().batch_depth, 0);
    }

    #[test]
    fn batch_depth_recovers_from_panics() {
        let result = panic::catch_unwind(|| {
            let _ = batch(|| -> Result<()> { panic!("inside batch") });
        });
        assert!(result.is_err());
        assert_eq!(Runtime::stats().batch_depth, 0);
    }

    #[test]
    fn batch_returns_the_closure_error() {
        let err = batch(|| -> Result<()> { Err(ReactiveError::RunawayEffects { limit: 1 }) })
            .unwrap_err();
        assert!(matches!(err, ReactiveError::RunawayEffects { limit: 1 }));
    }

    #[test]
    fn labels_are_used_in_descriptions() {
        Runtime::with(|rt| {
            let id = rt.create_node(NodeKind::Memo);
            assert_eq!(rt.state().describe(id), format!("memo {id}"));

            rt.set_label(id, Cow::Borrowed("total"));
            assert_eq!(rt.state().describe(id), "total");

            rt.release_node(id);
            assert!(rt.state().ensure_live(id, NodeKind::Memo).is_err());
        });
    }
}
