//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! A node is the engine-side half of a signal, memo or effect: it carries the
//! bookkeeping (state, version, edge lists) while the typed value lives in the
//! user-facing handle.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use super::edge::EdgeList;
use crate::reactive::Computation;

/// Unique identifier for a node in the dependency graph.
///
/// The slot is an index into the node arena. The generation distinguishes
/// successive occupants of the same slot, so an id that outlived its node
/// never resolves to an unrelated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: usize,
    generation: u64,
}

impl NodeId {
    pub(crate) fn new(slot: usize, generation: u64) -> Self {
        Self { slot, generation }
    }

    /// Get the arena slot of this node.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Get the generation of this node.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node (signal). Only ever a producer.
    Signal,

    /// A derived node (memo). A consumer of its dependencies and a producer
    /// for whatever reads it.
    Memo,

    /// An effect node. Only ever a consumer.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind can appear on the producer side of an edge.
    pub fn is_producer(self) -> bool {
        matches!(self, NodeKind::Signal | NodeKind::Memo)
    }

    /// Whether nodes of this kind can appear on the consumer side of an edge.
    pub fn is_consumer(self) -> bool {
        matches!(self, NodeKind::Memo | NodeKind::Effect)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Signal => "signal",
            NodeKind::Memo => "memo",
            NodeKind::Effect => "effect",
        };
        f.write_str(name)
    }
}

/// Staleness state of a node.
///
/// Signals are always `Clean`. Memos move through all four states. Effects
/// use `Clean`, `Pending` and `Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// The cached value is consistent with every dependency version.
    Clean = 0,

    /// A dependency was written. Whether the value really changed is not
    /// known until the dependencies are checked.
    Pending = 1,

    /// The node must recompute before its value can be trusted.
    Dirty = 2,

    /// The node has no subscribers. Its cached value is kept but pushes no
    /// longer reach it, so every read re-checks its dependencies.
    CleanOrphan = 3,
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) generation: u64,
    pub(crate) kind: NodeKind,
    pub(crate) state: NodeState,

    /// Bumped whenever the node's value changes. Consumers compare it with
    /// the version recorded on their edge.
    pub(crate) version: u64,

    /// Set while a memo is being brought up to date or an effect is running.
    pub(crate) running: bool,

    /// Set while an effect sits in the effect queue.
    pub(crate) scheduled: bool,

    /// The last compute or run failed. Pushes walk through errored memos so
    /// a later write can retry them.
    pub(crate) errored: bool,

    /// A stale memo that a failed run never reached. Pushes walk through it
    /// until it settles, so the failed consumer hears about later writes.
    pub(crate) relay: bool,

    /// Edges where this node is the consumer.
    pub(crate) dependencies: EdgeList,

    /// Edges where this node is the producer.
    pub(crate) subscribers: EdgeList,

    /// Compute or run body for memos and effects.
    pub(crate) computation: Option<Rc<dyn Computation>>,

    pub(crate) label: Option<Cow<'static, str>>,
}

impl Node {
    pub(crate) fn new(
        kind: NodeKind,
        generation: u64,
        computation: Option<Rc<dyn Computation>>,
    ) -> Self {
        Self {
            generation,
            kind,
            state: match kind {
                NodeKind::Signal => NodeState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Memo | NodeKind::Effect => NodeState::Dirty,
            },
            version: 0,
            running: false,
            scheduled: false,
            errored: false,
            relay: false,
            dependencies: EdgeList::default(),
            subscribers: EdgeList::default(),
            computation,
            label: None,
        }
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// The state a memo settles into once its value is confirmed current.
    pub(crate) fn settled_state(&self) -> NodeState {
        if self.has_subscribers() {
            NodeState::Clean
        } else {
            NodeState::CleanOrphan
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("running", &self.running)
            .field("scheduled", &self.scheduled)
            .field("errored", &self.errored)
            .field("relay", &self.relay)
            .field("label", &self.label)
            .finish()
    }
}
