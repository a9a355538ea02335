//! Graph Edges
//!
//! An edge records that one consumer read one producer. Each edge is a member
//! of two doubly-linked lists at once: the producer's subscriber list and the
//! consumer's dependency list. Links are arena indices rather than pointers.

use std::fmt;

use super::node::NodeId;

/// Index of an edge in the edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) usize);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Head and tail of one intrusive edge list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeList {
    pub(crate) head: Option<EdgeId>,
    pub(crate) tail: Option<EdgeId>,
}

impl EdgeList {
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// A dependency relationship between a producer and a consumer.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) producer: NodeId,
    pub(crate) consumer: NodeId,

    /// Producer version at the time the consumer last confirmed this edge.
    pub(crate) version: u64,

    /// Recomputation pass that last touched this edge.
    pub(crate) epoch: u64,

    // Producer's subscriber list.
    pub(crate) prev_subscriber: Option<EdgeId>,
    pub(crate) next_subscriber: Option<EdgeId>,

    // Consumer's dependency list.
    pub(crate) prev_dependency: Option<EdgeId>,
    pub(crate) next_dependency: Option<EdgeId>,
}

impl Edge {
    pub(crate) fn new(producer: NodeId, consumer: NodeId, version: u64, epoch: u64) -> Self {
        Self {
            producer,
            consumer,
            version,
            epoch,
            prev_subscriber: None,
            next_subscriber: None,
            prev_dependency: None,
            next_dependency: None,
        }
    }
}
