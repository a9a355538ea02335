//! Propagation
//!
//! Change propagation runs in two phases.
//!
//! # Push
//!
//! A write walks the subscriber edges of the written signal. Clean memos
//! become `Pending` and are walked in turn; effects are scheduled. Nothing is
//! recomputed during the push, so it only costs as much as the part of the
//! graph that could have changed.
//!
//! # Pull
//!
//! A read of a memo that is not `Clean` brings it up to date:
//!
//! - `Dirty`: recompute.
//! - `Pending` or `CleanOrphan`: walk the dependency edges in read order,
//!   bringing memo dependencies up to date first. The first edge whose
//!   recorded version differs from the producer's version forces a
//!   recompute. If no edge differs, the memo settles without recomputing.
//!
//! A recompute that produces an equal value does not notify subscribers, so
//! pending consumers further down settle without running.
//!
//! # Dependency Tracking
//!
//! Each compute pass gets a fresh epoch and a cursor into the consumer's
//! dependency list. Reads reuse the edge after the cursor when it points at
//! the same producer, move an existing edge into place when the read order
//! changed, or link a new one. Whatever lies past the cursor when the pass
//! succeeds was not read and is unlinked.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace, warn};

use super::context::{Frame, FrameGuard, FrameKind};
use super::runtime::{Runtime, State};
use crate::error::{ReactiveError, Result};
use crate::graph::{EdgeId, NodeId, NodeKind, NodeState};

impl State {
    /// Mark everything downstream of `producer` as possibly stale and
    /// schedule the effects reached.
    pub(crate) fn push(&mut self, producer: NodeId) {
        let mut stack: SmallVec<[NodeId; 16]> = smallvec![producer];
        let mut revisited: SmallVec<[NodeId; 8]> = SmallVec::new();

        while let Some(id) = stack.pop() {
            let mut cursor = self.graph.node(id).and_then(|node| node.subscribers.head);
            while let Some(edge) = cursor {
                let (consumer, next) = {
                    let edge = self.graph.edge(edge);
                    (edge.consumer, edge.next_subscriber)
                };
                cursor = next;

                let Some(node) = self.graph.node_mut(consumer) else {
                    continue;
                };
                match node.kind {
                    NodeKind::Memo => match node.state {
                        NodeState::Clean => {
                            node.state = NodeState::Pending;
                            trace!(node = %consumer, "memo pending");
                            stack.push(consumer);
                        }
                        // Failed memos, and stale memos a failed run never
                        // reached, have subscribers that were never told.
                        NodeState::Pending | NodeState::Dirty
                            if (node.errored || node.relay)
                                && !revisited.contains(&consumer) =>
                        {
                            revisited.push(consumer);
                            stack.push(consumer);
                        }
                        _ => {}
                    },
                    NodeKind::Effect => {
                        if !node.scheduled {
                            node.scheduled = true;
                            if node.state == NodeState::Clean {
                                node.state = NodeState::Pending;
                            }
                            trace!(node = %consumer, "effect scheduled");
                            self.queue.push(consumer);
                        }
                    }
                    NodeKind::Signal => {}
                }
            }
        }
    }

    /// Force `id` to recompute, notifying whatever depends on it.
    pub(crate) fn invalidate(&mut self, id: NodeId) {
        let Some(node) = self.graph.node_mut(id) else {
            return;
        };
        node.state = NodeState::Dirty;
        match node.kind {
            NodeKind::Memo => self.push(id),
            NodeKind::Effect => {
                if !node.scheduled {
                    node.scheduled = true;
                    self.queue.push(id);
                }
            }
            NodeKind::Signal => {}
        }
    }

    /// Remove one edge, keeping frame cursors valid.
    pub(crate) fn unlink_edge(&mut self, edge: EdgeId) {
        let prev = self.graph.edge(edge).prev_dependency;
        self.context.forget_edge(edge, prev);
        let removed = self.graph.unlink(edge);
        trace!(producer = %removed.producer, consumer = %removed.consumer, "unlinked edge");
        self.settle_orphan(removed.producer);
    }

    /// A clean memo that just lost its last subscriber stops receiving pushes.
    fn settle_orphan(&mut self, producer: NodeId) {
        if let Some(node) = self.graph.node_mut(producer) {
            if node.kind == NodeKind::Memo
                && node.state == NodeState::Clean
                && !node.has_subscribers()
            {
                node.state = NodeState::CleanOrphan;
            }
        }
    }

    /// Flag the stale memos upstream of a failed run so pushes keep
    /// walking through them to `failed`.
    pub(crate) fn relay_through(&mut self, failed: NodeId) {
        let mut stack: SmallVec<[NodeId; 16]> = smallvec![failed];
        while let Some(id) = stack.pop() {
            for edge in self.graph.dependency_edges(id) {
                let producer = self.graph.edge(edge).producer;
                let Some(node) = self.graph.node_mut(producer) else {
                    continue;
                };
                if node.kind == NodeKind::Memo
                    && !node.relay
                    && matches!(node.state, NodeState::Pending | NodeState::Dirty)
                {
                    node.relay = true;
                    trace!(node = %producer, consumer = %id, "relaying stale memo");
                    stack.push(producer);
                }
            }
        }
    }

    /// Unlink the dependencies of `consumer` that follow `cursor`.
    pub(crate) fn prune_after(&mut self, consumer: NodeId, cursor: Option<EdgeId>) {
        if !self.graph.contains(consumer) {
            return;
        }
        let mut next = self.graph.dependency_after(consumer, cursor);
        while let Some(edge) = next {
            next = self.graph.edge(edge).next_dependency;
            self.unlink_edge(edge);
        }
    }

    /// Link `producer` to the consumer on top of the context stack.
    pub(crate) fn track_read(&mut self, producer: NodeId) {
        let Some(consumer) = self.context.current_consumer() else {
            return;
        };
        let Some(&Frame { cursor, epoch, .. }) = self.context.current() else {
            return;
        };
        if !self.graph.contains(consumer) {
            return;
        }
        let Some(version) = self.graph.node(producer).map(|node| node.version) else {
            return;
        };

        let next = self
            .graph
            .dependency_after(consumer, cursor)
            .filter(|edge| self.graph.edge(*edge).producer == producer);

        let edge = match next {
            Some(edge) => edge,
            None => match self.graph.find_dependency(consumer, producer) {
                // Read twice in this pass: the edge is already in place.
                Some(edge) if self.graph.edge(edge).epoch == epoch => {
                    self.graph.edge_mut(edge).version = version;
                    return;
                }
                Some(edge) => {
                    self.graph.move_dependency_after(edge, cursor);
                    edge
                }
                None => {
                    let edge = self.graph.link(producer, consumer, cursor, version, epoch);
                    trace!(%producer, %consumer, "linked edge");
                    edge
                }
            },
        };

        let record = self.graph.edge_mut(edge);
        record.version = version;
        record.epoch = epoch;
        if let Some(frame) = self.context.current_mut() {
            frame.cursor = Some(edge);
        }

        if let Some(node) = self.graph.node_mut(producer) {
            if node.state == NodeState::CleanOrphan {
                node.state = NodeState::Clean;
            }
        }
    }
}

enum Update {
    Check,
    Recompute,
}

impl Runtime {
    /// Bring memo `id` up to date.
    pub(crate) fn update_memo(&self, id: NodeId) -> Result<()> {
        let action = {
            let state = self.state();
            let Some(node) = state.graph.node(id) else {
                return Err(ReactiveError::disposed(id, NodeKind::Memo));
            };
            if node.running {
                let err = state.cycle_error(id);
                debug!(node = %id, error = %err, "cycle detected");
                return Err(err);
            }
            match node.state {
                NodeState::Clean => return Ok(()),
                NodeState::Dirty => Update::Recompute,
                NodeState::Pending | NodeState::CleanOrphan => Update::Check,
            }
        };

        let guard = RunningGuard::enter(self, id, NodeKind::Memo);
        let result = match action {
            Update::Recompute => self.recompute(id),
            Update::Check => match self.dependencies_changed(id) {
                Ok(true) => self.recompute(id),
                Ok(false) => {
                    let mut state = self.state();
                    if let Some(node) = state.graph.node_mut(id) {
                        node.state = node.settled_state();
                        node.relay = false;
                        trace!(node = %id, state = ?node.state, "memo settled");
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            },
        };
        guard.finish(result.is_err());
        result
    }

    /// Check whether any dependency of `id` changed since it last ran.
    pub(crate) fn dependencies_changed(&self, id: NodeId) -> Result<bool> {
        let mut cursor = self
            .state()
            .graph
            .node(id)
            .and_then(|node| node.dependencies.head);

        while let Some(edge) = cursor {
            let (producer, kind) = {
                let state = self.state();
                let producer = state.graph.edge(edge).producer;
                match state.graph.node(producer) {
                    Some(node) => (producer, node.kind),
                    None => return Ok(true),
                }
            };

            if kind == NodeKind::Memo {
                self.update_memo(producer)?;
            }

            let state = self.state();
            if !state.graph.has_edge(edge) {
                return Ok(true);
            }
            let record = state.graph.edge(edge);
            if record.consumer != id || record.producer != producer {
                return Ok(true);
            }
            let current = state.graph.node(producer).map(|node| node.version);
            if current != Some(record.version) {
                trace!(node = %id, %producer, "dependency changed");
                return Ok(true);
            }
            cursor = record.next_dependency;
        }
        Ok(false)
    }

    /// Run the compute of memo `id` and publish the result.
    fn recompute(&self, id: NodeId) -> Result<()> {
        let (computation, epoch) = {
            let mut state = self.state();
            let computation = state
                .graph
                .node(id)
                .and_then(|node| node.computation.clone())
                .ok_or_else(|| ReactiveError::disposed(id, NodeKind::Memo))?;
            (computation, state.next_epoch())
        };

        trace!(node = %id, epoch, "recomputing memo");
        let frame = FrameGuard::enter(self, Frame::tracking(FrameKind::Memo, id, epoch));
        let outcome = computation.compute();
        let frame = frame.finish();
        let changed = outcome?;

        let mut state = self.state();
        state.prune_after(id, frame.cursor);
        let Some(node) = state.graph.node_mut(id) else {
            return Ok(());
        };
        node.errored = false;
        node.relay = false;
        node.state = node.settled_state();
        if changed {
            node.version += 1;
            trace!(node = %id, version = node.version, "memo changed");
            state.push(id);
        }
        Ok(())
    }

    /// Run effect `id`: tear down the previous run, then track a new one.
    pub(crate) fn run_effect(&self, id: NodeId) -> Result<()> {
        let computation = {
            let state = self.state();
            match state.graph.node(id).and_then(|node| node.computation.clone()) {
                Some(computation) => computation,
                None => return Ok(()),
            }
        };

        computation.cleanup();

        let epoch = {
            let mut state = self.state();
            let Some(node) = state.graph.node_mut(id) else {
                // The teardown disposed the effect.
                return Ok(());
            };
            node.state = NodeState::Clean;
            node.scheduled = false;
            state.next_epoch()
        };

        trace!(node = %id, epoch, "running effect");
        let guard = RunningGuard::enter(self, id, NodeKind::Effect);
        let frame = FrameGuard::enter(self, Frame::tracking(FrameKind::Effect, id, epoch));
        let outcome = computation.compute();
        let frame = frame.finish();
        guard.finish(outcome.is_err());

        let disposed = {
            let mut state = self.state();
            if !state.graph.contains(id) {
                true
            } else {
                if outcome.is_ok() {
                    state.prune_after(id, frame.cursor);
                }
                false
            }
        };
        if disposed {
            // Disposed from inside its own run: nothing will call the new
            // teardown later.
            computation.cleanup();
        }
        outcome.map(|_| ())
    }

    /// Handle one queue entry.
    fn process_effect(&self, id: NodeId) -> Result<()> {
        let status = {
            let state = self.state();
            match state.graph.node(id) {
                Some(node) if node.scheduled => node.state,
                _ => return Ok(()),
            }
        };

        let rerun = match status {
            NodeState::Dirty => true,
            NodeState::Clean => false,
            NodeState::Pending | NodeState::CleanOrphan => self.dependencies_changed(id)?,
        };

        if rerun {
            self.run_effect(id)
        } else {
            let mut state = self.state();
            if let Some(node) = state.graph.node_mut(id) {
                node.state = NodeState::Clean;
                node.scheduled = false;
            }
            trace!(node = %id, "effect skipped, dependencies unchanged");
            Ok(())
        }
    }

    /// Drain the effect queue unless a batch, a drain or a computation is
    /// already in progress.
    pub(crate) fn drain_effects(&self) -> Result<()> {
        {
            let mut state = self.state();
            if !state.queue.can_flush()
                || state.context.inside_computation()
                || state.queue.is_empty()
            {
                return Ok(());
            }
            state.queue.set_flushing(true);
            debug!(queued = state.queue.len(), "draining effect queue");
        }
        let _flushing = FlushGuard { runtime: self };

        let config = self.current_config();
        let mut errors = Vec::new();
        let mut runs = 0usize;

        loop {
            let next = self.state().queue.pop();
            let Some(id) = next else {
                break;
            };

            runs += 1;
            if runs > config.max_effect_runs_per_flush {
                let dropped = self.abandon_queue(id);
                warn!(
                    limit = config.max_effect_runs_per_flush,
                    dropped, "effect flush exceeded its run limit"
                );
                errors.push(ReactiveError::RunawayEffects {
                    limit: config.max_effect_runs_per_flush,
                });
                break;
            }

            let result = if config.isolate_effect_panics {
                panic::catch_unwind(AssertUnwindSafe(|| self.process_effect(id)))
                    .unwrap_or_else(|payload| Err(ReactiveError::panicked(payload)))
            } else {
                self.process_effect(id)
            };

            if let Err(err) = result {
                warn!(effect = %id, error = %err, "effect failed");
                self.mark_effect_failed(id);
                errors.push(ReactiveError::EffectFailed {
                    effect: id,
                    source: Box::new(err),
                });
            }
        }

        debug!(runs, failures = errors.len(), "effect queue drained");
        ReactiveError::collect(errors)
    }

    /// Drop `current` and every queued entry after a runaway drain.
    fn abandon_queue(&self, current: NodeId) -> usize {
        let mut state = self.state();
        let mut dropped = state.queue.clear();
        dropped.push(current);
        for id in &dropped {
            if let Some(node) = state.graph.node_mut(*id) {
                node.scheduled = false;
            }
        }
        dropped.len()
    }

    /// Leave a failed effect dirty so the next push reschedules it.
    fn mark_effect_failed(&self, id: NodeId) {
        let mut state = self.state();
        let queued = state.queue.contains(id);
        if let Some(node) = state.graph.node_mut(id) {
            node.state = NodeState::Dirty;
            node.errored = true;
            if !queued {
                node.scheduled = false;
            }
        }
        state.relay_through(id);
    }
}

/// Guard that clears the `running` flag when dropped.
///
/// A computation that fails or panics leaves its node `Dirty` so the next
/// read or push retries it.
struct RunningGuard<'rt> {
    runtime: &'rt Runtime,
    id: NodeId,
    kind: NodeKind,
    active: bool,
}

impl<'rt> RunningGuard<'rt> {
    fn enter(runtime: &'rt Runtime, id: NodeId, kind: NodeKind) -> Self {
        let mut state = runtime.state();
        if let Some(node) = state.graph.node_mut(id) {
            node.running = true;
        }
        if kind == NodeKind::Memo {
            state.context.enter_update(id);
        }
        Self {
            runtime,
            id,
            kind,
            active: true,
        }
    }

    fn finish(mut self, failed: bool) {
        self.active = false;
        let mut state = self.runtime.state();
        self.release(&mut state, failed);
    }

    fn release(&self, state: &mut State, failed: bool) {
        if self.kind == NodeKind::Memo {
            state.context.exit_update(self.id);
        }
        if let Some(node) = state.graph.node_mut(self.id) {
            node.running = false;
            node.errored = failed;
            if failed {
                node.state = NodeState::Dirty;
            }
        }
        if failed {
            state.relay_through(self.id);
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(mut state) = self.runtime.try_state() {
            self.release(&mut state, thread::panicking());
        }
    }
}

/// Guard that ends a drain when dropped.
struct FlushGuard<'rt> {
    runtime: &'rt Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.runtime.try_state() {
            state.queue.set_flushing(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(f: impl FnOnce(&mut State)) {
        let mut state = State::default();
        f(&mut state);
    }

    #[test]
    fn push_marks_memos_pending_and_schedules_effects() {
        state_with(|state| {
            let signal = state.graph.insert(NodeKind::Signal, None);
            let memo = state.graph.insert(NodeKind::Memo, None);
            let effect = state.graph.insert(NodeKind::Effect, None);
            state.graph.link(signal, memo, None, 0, 1);
            state.graph.link(memo, effect, None, 0, 1);
            state.graph.node_mut(memo).unwrap().state = NodeState::Clean;
            state.graph.node_mut(effect).unwrap().state = NodeState::Clean;

            state.push(signal);

            assert_eq!(state.graph.node(memo).unwrap().state, NodeState::Pending);
            let effect_node = state.graph.node(effect).unwrap();
            assert_eq!(effect_node.state, NodeState::Pending);
            assert!(effect_node.scheduled);
            assert_eq!(state.queue.len(), 1);
        });
    }

    #[test]
    fn push_schedules_each_effect_once() {
        state_with(|state| {
            let a = state.graph.insert(NodeKind::Signal, None);
            let b = state.graph.insert(NodeKind::Signal, None);
            let effect = state.graph.insert(NodeKind::Effect, None);
            let first = state.graph.link(a, effect, None, 0, 1);
            state.graph.link(b, effect, Some(first), 0, 1);

            state.push(a);
            state.push(b);

            assert_eq!(state.queue.len(), 1);
        });
    }

    #[test]
    fn push_stops_at_orphans() {
        state_with(|state| {
            let signal = state.graph.insert(NodeKind::Signal, None);
            let orphan = state.graph.insert(NodeKind::Memo, None);
            state.graph.link(signal, orphan, None, 0, 1);
            state.graph.node_mut(orphan).unwrap().state = NodeState::CleanOrphan;

            state.push(signal);

            assert_eq!(state.graph.node(orphan).unwrap().state, NodeState::CleanOrphan);
        });
    }

    #[test]
    fn losing_the_last_subscriber_orphans_a_clean_memo() {
        state_with(|state| {
            let memo = state.graph.insert(NodeKind::Memo, None);
            let effect = state.graph.insert(NodeKind::Effect, None);
            let edge = state.graph.link(memo, effect, None, 0, 1);
            state.graph.node_mut(memo).unwrap().state = NodeState::Clean;

            state.unlink_edge(edge);

            assert_eq!(state.graph.node(memo).unwrap().state, NodeState::CleanOrphan);
        });
    }

    #[test]
    fn track_read_reuses_moves_and_links_edges() {
        state_with(|state| {
            let a = state.graph.insert(NodeKind::Signal, None);
            let b = state.graph.insert(NodeKind::Signal, None);
            let memo = state.graph.insert(NodeKind::Memo, None);

            // First pass reads a then b.
            state.context.push(Frame::tracking(FrameKind::Memo, memo, 1));
            state.track_read(a);
            state.track_read(b);
            state.track_read(a);
            let frame = state.context.pop().unwrap();
            state.prune_after(memo, frame.cursor);
            assert_eq!(state.graph.edge_count(), 2);

            // Second pass reads only b.
            state.context.push(Frame::tracking(FrameKind::Memo, memo, 2));
            state.track_read(b);
            let frame = state.context.pop().unwrap();
            state.prune_after(memo, frame.cursor);

            let producers: Vec<_> = state
                .graph
                .dependency_edges(memo)
                .into_iter()
                .map(|edge| state.graph.edge(edge).producer)
                .collect();
            assert_eq!(producers, vec![b]);
            assert!(!state.graph.node(a).unwrap().has_subscribers());
        });
    }

    #[test]
    fn untracked_reads_link_nothing() {
        state_with(|state| {
            let a = state.graph.insert(NodeKind::Signal, None);
            let memo = state.graph.insert(NodeKind::Memo, None);
            state.context.push(Frame::tracking(FrameKind::Memo, memo, 1));
            state.context.push(Frame::untracked());

            state.track_read(a);

            assert_eq!(state.graph.edge_count(), 0);
        });
    }

    #[test]
    fn pushes_walk_through_memos_a_failed_run_never_reached() {
        state_with(|state| {
            let signal = state.graph.insert(NodeKind::Signal, None);
            let memo = state.graph.insert(NodeKind::Memo, None);
            let effect = state.graph.insert(NodeKind::Effect, None);
            state.graph.link(signal, memo, None, 0, 1);
            state.graph.link(memo, effect, None, 0, 1);
            state.graph.node_mut(memo).unwrap().state = NodeState::Pending;

            state.push(signal);
            assert!(state.queue.is_empty());

            state.relay_through(effect);
            assert!(state.graph.node(memo).unwrap().relay);

            state.push(signal);
            assert_eq!(state.queue.len(), 1);
            assert!(state.graph.node(effect).unwrap().scheduled);
        });
    }

    #[test]
    fn invalidated_effects_are_queued_once() {
        state_with(|state| {
            let effect = state.graph.insert(NodeKind::Effect, None);
            state.invalidate(effect);
            state.invalidate(effect);

            assert_eq!(state.queue.len(), 1);
            assert_eq!(state.graph.node(effect).unwrap().state, NodeState::Dirty);
        });
    }
}
