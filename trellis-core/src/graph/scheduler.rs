//! Effect Queue
//!
//! The queue determines when and in which order scheduled effects run.
//!
//! # Algorithm
//!
//! 1. A push that reaches an effect appends it here (once: the node's
//!    `scheduled` flag deduplicates).
//! 2. While a batch is open, nothing drains. Staleness still propagates so
//!    reads inside the batch see consistent values.
//! 3. When the outermost batch closes, or after a write outside any batch,
//!    the queue drains front to back. Effects enqueued by effects that are
//!    running join the back of the same drain rather than starting a nested
//!    one.

use std::collections::VecDeque;

use super::node::NodeId;

/// FIFO of scheduled effects plus the batch and drain bookkeeping.
#[derive(Debug, Default)]
pub struct EffectQueue {
    queue: VecDeque<NodeId>,
    batch_depth: usize,
    flushing: bool,
}

impl EffectQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an effect. Deduplication is the caller's job.
    pub fn push(&mut self, effect: NodeId) {
        self.queue.push_back(effect);
    }

    /// Take the effect scheduled earliest.
    pub fn pop(&mut self) -> Option<NodeId> {
        self.queue.pop_front()
    }

    /// Drop every queued entry, returning them in scheduling order.
    pub fn clear(&mut self) -> Vec<NodeId> {
        self.queue.drain(..).collect()
    }

    /// Check whether `effect` is waiting in the queue.
    pub fn contains(&self, effect: NodeId) -> bool {
        self.queue.contains(&effect)
    }

    /// Get the number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Open a (possibly nested) batch.
    pub fn enter_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close a batch. Returns `true` when this closed the outermost one.
    pub fn exit_batch(&mut self) -> bool {
        debug_assert!(self.batch_depth > 0, "batch exit without matching enter");
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0
    }

    /// Get the current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.batch_depth
    }

    /// Check whether a drain may start now.
    pub fn can_flush(&self) -> bool {
        self.batch_depth == 0 && !self.flushing
    }

    pub(crate) fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }
}
