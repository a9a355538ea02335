//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or memo is read,
//! the engine links it to the consumer on top of the stack.
//!
//! # Implementation
//!
//! The stack lives inside the thread's runtime. Running a memo or effect
//! pushes a frame holding the consumer and an edge cursor: the last
//! dependency edge confirmed during this pass. Reads advance the cursor, so
//! when the computation returns, everything past it is a dependency that
//! was not read this time.
//!
//! Nested contexts (a memo that reads another memo) simply stack.
//!
//! A second stack records which memos are being brought up to date. It is
//! only consulted to describe a cycle when one is found.

use smallvec::SmallVec;

use super::runtime::Runtime;
use crate::graph::{EdgeId, NodeId};

/// What kind of computation pushed a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Memo,
    Effect,
    /// Reads are not tracked while this frame is on top.
    Untracked,
}

/// One entry of the reactive context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) kind: FrameKind,
    pub(crate) consumer: Option<NodeId>,
    pub(crate) cursor: Option<EdgeId>,
    pub(crate) epoch: u64,
}

impl Frame {
    pub(crate) fn tracking(kind: FrameKind, consumer: NodeId, epoch: u64) -> Self {
        Self {
            kind,
            consumer: Some(consumer),
            cursor: None,
            epoch,
        }
    }

    pub(crate) fn untracked() -> Self {
        Self {
            kind: FrameKind::Untracked,
            consumer: None,
            cursor: None,
            epoch: 0,
        }
    }
}

/// The reactive context stack of one runtime.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: SmallVec<[Frame; 8]>,
    updating: SmallVec<[NodeId; 16]>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub(crate) fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// The consumer reads should be linked to, if any.
    pub(crate) fn current_consumer(&self) -> Option<NodeId> {
        self.current().and_then(|frame| frame.consumer)
    }

    /// The innermost memo being computed anywhere on the stack.
    pub(crate) fn computing_memo(&self) -> Option<NodeId> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.kind == FrameKind::Memo)
            .and_then(|frame| frame.consumer)
    }

    /// Whether a memo or effect body is somewhere on the stack.
    pub(crate) fn inside_computation(&self) -> bool {
        self.frames.iter().any(|frame| frame.kind != FrameKind::Untracked)
    }

    /// Keep cursors valid when `edge` is about to be unlinked.
    pub(crate) fn forget_edge(&mut self, edge: EdgeId, replacement: Option<EdgeId>) {
        for frame in self.frames.iter_mut() {
            if frame.cursor == Some(edge) {
                frame.cursor = replacement;
            }
        }
    }

    pub(crate) fn enter_update(&mut self, node: NodeId) {
        self.updating.push(node);
    }

    pub(crate) fn exit_update(&mut self, node: NodeId) {
        if let Some(position) = self.updating.iter().rposition(|n| *n == node) {
            self.updating.remove(position);
        }
    }

    /// Memos currently being updated, from the outermost to `node`.
    pub(crate) fn update_path_from(&self, node: NodeId) -> &[NodeId] {
        let start = self
            .updating
            .iter()
            .position(|n| *n == node)
            .unwrap_or(self.updating.len());
        &self.updating[start..]
    }
}

/// Guard that pops a frame when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct FrameGuard<'rt> {
    runtime: &'rt Runtime,
    active: bool,
}

impl<'rt> FrameGuard<'rt> {
    pub(crate) fn enter(runtime: &'rt Runtime, frame: Frame) -> Self {
        runtime.state().context.push(frame);
        Self {
            runtime,
            active: true,
        }
    }

    /// Pop the frame and hand back its final cursor.
    pub(crate) fn finish(mut self) -> Frame {
        self.active = false;
        self.runtime
            .state()
            .context
            .pop()
            .expect("reactive context stack underflow")
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(mut state) = self.runtime.try_state() {
            state.context.pop();
        }
    }
}
