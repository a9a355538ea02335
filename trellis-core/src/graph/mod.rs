//! Dependency Graph
//!
//! This module implements the storage side of the reactive engine: an arena
//! of nodes and an arena of edges linking them.
//!
//! # Overview
//!
//! - Nodes represent signals, memos and effects.
//! - An edge from producer P to consumer C means "C read P the last time it
//!   ran". Each edge sits in two intrusive doubly-linked lists at once: P's
//!   subscriber list and C's dependency list.
//!
//! # Design Decisions
//!
//! 1. Links are arena indices (`Option<EdgeId>`), so inserting, moving and
//!    removing an edge is O(1) and never reallocates per recomputation.
//!
//! 2. A consumer's dependency list is kept in read order. Recomputation
//!    walks it with a cursor, reusing edges in place when the read order is
//!    stable and unlinking whatever lies past the cursor afterwards.
//!
//! 3. Node ids carry a generation so ids held by handles or by the effect
//!    queue go stale instead of aliasing a reused slot.

mod edge;
mod node;
mod scheduler;

pub use edge::EdgeId;
pub use node::{NodeId, NodeKind, NodeState};
pub(crate) use scheduler::EffectQueue;

pub(crate) use edge::{Edge, EdgeList};
pub(crate) use node::Node;

use std::rc::Rc;

use slab::Slab;

use crate::reactive::Computation;

/// Arena holding every node and edge of one runtime.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: Slab<Node>,
    edges: Slab<Edge>,
    generation: u64,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check whether `id` still names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub(crate) fn insert(
        &mut self,
        kind: NodeKind,
        computation: Option<Rc<dyn Computation>>,
    ) -> NodeId {
        self.generation += 1;
        let generation = self.generation;
        let slot = self.nodes.insert(Node::new(kind, generation, computation));
        NodeId::new(slot, generation)
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.slot())
            .filter(|node| node.generation == id.generation())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.slot())
            .filter(|node| node.generation == id.generation())
    }

    /// Remove a node whose edges have all been unlinked.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.node(id)?;
        let node = self.nodes.remove(id.slot());
        debug_assert!(node.dependencies.is_empty(), "removed node still has dependencies");
        debug_assert!(node.subscribers.is_empty(), "removed node still has subscribers");
        Some(node)
    }

    pub(crate) fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0]
    }

    pub(crate) fn has_edge(&self, id: EdgeId) -> bool {
        self.edges.contains(id.0)
    }

    /// Create an edge and splice it into both lists.
    ///
    /// The edge goes right after `after` in the consumer's dependency list (at
    /// the head when `after` is `None`) and at the tail of the producer's
    /// subscriber list.
    pub(crate) fn link(
        &mut self,
        producer: NodeId,
        consumer: NodeId,
        after: Option<EdgeId>,
        version: u64,
        epoch: u64,
    ) -> EdgeId {
        debug_assert!(self.node(producer).map_or(true, |node| node.kind.is_producer()));
        debug_assert!(self.node(consumer).map_or(true, |node| node.kind.is_consumer()));
        let id = EdgeId(self.edges.insert(Edge::new(producer, consumer, version, epoch)));
        self.insert_dependency_after(id, after);
        self.append_subscriber(id);
        id
    }

    /// Remove an edge from both lists and free it.
    pub(crate) fn unlink(&mut self, id: EdgeId) -> Edge {
        self.detach_dependency(id);
        self.detach_subscriber(id);
        self.edges.remove(id.0)
    }

    /// Reposition an edge inside its consumer's dependency list.
    pub(crate) fn move_dependency_after(&mut self, id: EdgeId, after: Option<EdgeId>) {
        if after == Some(id) {
            return;
        }
        self.detach_dependency(id);
        self.insert_dependency_after(id, after);
    }

    /// The edge that follows `cursor` in `consumer`'s dependency list, or the
    /// list head when no edge has been confirmed yet.
    pub(crate) fn dependency_after(&self, consumer: NodeId, cursor: Option<EdgeId>) -> Option<EdgeId> {
        match cursor {
            Some(edge) => self.edge(edge).next_dependency,
            None => self.node(consumer).and_then(|node| node.dependencies.head),
        }
    }

    /// Find the edge linking `producer` to `consumer`, if any.
    pub(crate) fn find_dependency(&self, consumer: NodeId, producer: NodeId) -> Option<EdgeId> {
        let mut cursor = self.node(consumer)?.dependencies.head;
        while let Some(id) = cursor {
            let edge = self.edge(id);
            if edge.producer == producer {
                return Some(id);
            }
            cursor = edge.next_dependency;
        }
        None
    }

    /// Collect the edges of `id`'s dependency list, head first.
    pub(crate) fn dependency_edges(&self, id: NodeId) -> Vec<EdgeId> {
        let mut out = Vec::new();
        let mut cursor = self.node(id).and_then(|node| node.dependencies.head);
        while let Some(edge) = cursor {
            out.push(edge);
            cursor = self.edge(edge).next_dependency;
        }
        out
    }

    /// Collect the edges of `id`'s subscriber list, head first.
    pub(crate) fn subscriber_edges(&self, id: NodeId) -> Vec<EdgeId> {
        let mut out = Vec::new();
        let mut cursor = self.node(id).and_then(|node| node.subscribers.head);
        while let Some(edge) = cursor {
            out.push(edge);
            cursor = self.edge(edge).next_subscriber;
        }
        out
    }

    fn dependency_list(&mut self, consumer: NodeId) -> &mut EdgeList {
        &mut self.nodes[consumer.slot()].dependencies
    }

    fn subscriber_list(&mut self, producer: NodeId) -> &mut EdgeList {
        &mut self.nodes[producer.slot()].subscribers
    }

    fn insert_dependency_after(&mut self, id: EdgeId, after: Option<EdgeId>) {
        let consumer = self.edge(id).consumer;
        let next = self.dependency_after(consumer, after);
        {
            let edge = self.edge_mut(id);
            edge.prev_dependency = after;
            edge.next_dependency = next;
        }
        match after {
            Some(prev) => self.edge_mut(prev).next_dependency = Some(id),
            None => self.dependency_list(consumer).head = Some(id),
        }
        match next {
            Some(next) => self.edge_mut(next).prev_dependency = Some(id),
            None => self.dependency_list(consumer).tail = Some(id),
        }
    }

    fn detach_dependency(&mut self, id: EdgeId) {
        let (consumer, prev, next) = {
            let edge = self.edge(id);
            (edge.consumer, edge.prev_dependency, edge.next_dependency)
        };
        match prev {
            Some(prev) => self.edge_mut(prev).next_dependency = next,
            None => self.dependency_list(consumer).head = next,
        }
        match next {
            Some(next) => self.edge_mut(next).prev_dependency = prev,
            None => self.dependency_list(consumer).tail = prev,
        }
        let edge = self.edge_mut(id);
        edge.prev_dependency = None;
        edge.next_dependency = None;
    }

    fn append_subscriber(&mut self, id: EdgeId) {
        let producer = self.edge(id).producer;
        let tail = self.subscriber_list(producer).tail;
        {
            let edge = self.edge_mut(id);
            edge.prev_subscriber = tail;
            edge.next_subscriber = None;
        }
        match tail {
            Some(tail) => self.edge_mut(tail).next_subscriber = Some(id),
            None => self.subscriber_list(producer).head = Some(id),
        }
        self.subscriber_list(producer).tail = Some(id);
    }

    fn detach_subscriber(&mut self, id: EdgeId) {
        let (producer, prev, next) = {
            let edge = self.edge(id);
            (edge.producer, edge.prev_subscriber, edge.next_subscriber)
        };
        match prev {
            Some(prev) => self.edge_mut(prev).next_subscriber = next,
            None => self.subscriber_list(producer).head = next,
        }
        match next {
            Some(next) => self.edge_mut(next).prev_subscriber = prev,
            None => self.subscriber_list(producer).tail = prev,
        }
        let edge = self.edge_mut(id);
        edge.prev_subscriber = None;
        edge.next_subscriber = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producers(graph: &Graph, consumer: NodeId) -> Vec<NodeId> {
        graph
            .dependency_edges(consumer)
            .into_iter()
            .map(|edge| graph.edge(edge).producer)
            .collect()
    }

    fn consumers(graph: &Graph, producer: NodeId) -> Vec<NodeId> {
        graph
            .subscriber_edges(producer)
            .into_iter()
            .map(|edge| graph.edge(edge).consumer)
            .collect()
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();
        let a = graph.insert(NodeKind::Signal, None);
        let b = graph.insert(NodeKind::Memo, None);
        assert_eq!(graph.node_count(), 2);

        graph.remove(a);
        assert_eq!(graph.node_count(), 1);
        assert!(!graph.contains(a));
        assert!(graph.contains(b));
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut graph = Graph::new();
        let old = graph.insert(NodeKind::Signal, None);
        graph.remove(old);

        let new = graph.insert(NodeKind::Signal, None);
        assert_eq!(old.slot(), new.slot());
        assert!(!graph.contains(old));
        assert!(graph.contains(new));
    }

    #[test]
    fn link_appears_in_both_lists() {
        let mut graph = Graph::new();
        let a = graph.insert(NodeKind::Signal, None);
        let b = graph.insert(NodeKind::Signal, None);
        let memo = graph.insert(NodeKind::Memo, None);
        let effect = graph.insert(NodeKind::Effect, None);

        let e1 = graph.link(a, memo, None, 0, 1);
        graph.link(b, memo, Some(e1), 0, 1);
        graph.link(a, effect, None, 0, 1);

        assert_eq!(producers(&graph, memo), vec![a, b]);
        assert_eq!(consumers(&graph, a), vec![memo, effect]);
        assert_eq!(consumers(&graph, b), vec![memo]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn unlink_removes_from_both_lists() {
        let mut graph = Graph::new();
        let a = graph.insert(NodeKind::Signal, None);
        let b = graph.insert(NodeKind::Signal, None);
        let c = graph.insert(NodeKind::Signal, None);
        let memo = graph.insert(NodeKind::Memo, None);

        let e1 = graph.link(a, memo, None, 0, 1);
        let e2 = graph.link(b, memo, Some(e1), 0, 1);
        graph.link(c, memo, Some(e2), 0, 1);

        let removed = graph.unlink(e2);
        assert_eq!(removed.producer, b);
        assert_eq!(producers(&graph, memo), vec![a, c]);
        assert!(consumers(&graph, b).is_empty());
        assert!(graph.node(b).map(|n| n.subscribers.is_empty()).unwrap_or(false));

        let node = graph.node(memo).unwrap();
        assert_eq!(graph.edge(node.dependencies.tail.unwrap()).producer, c);
    }

    #[test]
    fn move_dependency_reorders_consumer_list_only() {
        let mut graph = Graph::new();
        let a = graph.insert(NodeKind::Signal, None);
        let b = graph.insert(NodeKind::Signal, None);
        let c = graph.insert(NodeKind::Signal, None);
        let memo = graph.insert(NodeKind::Memo, None);

        let e1 = graph.link(a, memo, None, 0, 1);
        let e2 = graph.link(b, memo, Some(e1), 0, 1);
        let e3 = graph.link(c, memo, Some(e2), 0, 1);

        graph.move_dependency_after(e3, None);
        assert_eq!(producers(&graph, memo), vec![c, a, b]);

        graph.move_dependency_after(e1, Some(e2));
        assert_eq!(producers(&graph, memo), vec![c, b, a]);

        assert_eq!(consumers(&graph, a), vec![memo]);
        assert_eq!(graph.find_dependency(memo, b), Some(e2));
    }

    #[test]
    fn dependency_after_cursor() {
        let mut graph = Graph::new();
        let a = graph.insert(NodeKind::Signal, None);
        let b = graph.insert(NodeKind::Signal, None);
        let memo = graph.insert(NodeKind::Memo, None);

        let e1 = graph.link(a, memo, None, 0, 1);
        let e2 = graph.link(b, memo, Some(e1), 0, 1);

        assert_eq!(graph.dependency_after(memo, None), Some(e1));
        assert_eq!(graph.dependency_after(memo, Some(e1)), Some(e2));
        assert_eq!(graph.dependency_after(memo, Some(e2)), None);
    }
}
