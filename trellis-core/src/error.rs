//! Error types for the reactive engine.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{NodeId, NodeKind};

/// Convenience alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by reads, writes, batches and disposal.
///
/// User callbacks return `Result<_, ReactiveError>`, so engine errors from
/// nested reads propagate with `?`. Errors of the callback's own making go
/// through [`ReactiveError::callback`] or the `From<anyhow::Error>` impl.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A memo was read while it was already being brought up to date further
    /// up the same call stack.
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency {
        /// Nodes forming the cycle, starting and ending with the repeated one.
        path: Vec<String>,
    },

    /// A handle was used after its node was disposed.
    #[error("{kind} {node} was accessed after being disposed")]
    DisposedNodeAccessed { node: NodeId, kind: NodeKind },

    /// A write or disposal was attempted while a memo was computing.
    #[error("the reactive graph cannot be modified while memo {node} is computing")]
    WriteDuringCompute { node: NodeId },

    /// A node's value was already borrowed by a reentrant access.
    #[error("value of {node} is already borrowed")]
    BorrowConflict { node: NodeId },

    /// A compute or run callback returned an error of its own.
    #[error("callback failed: {0}")]
    CallbackFailed(Arc<anyhow::Error>),

    /// An effect panicked while the queue was draining.
    #[error("callback panicked: {message}")]
    CallbackPanicked { message: String },

    /// One effect failed during a drain.
    #[error("effect {effect} failed: {source}")]
    EffectFailed {
        effect: NodeId,
        #[source]
        source: Box<ReactiveError>,
    },

    /// Several effects failed during one drain, in the order they ran.
    #[error("{} effects failed during one flush", .0.len())]
    Multiple(Vec<ReactiveError>),

    /// A drain processed more effects than the configured limit, most likely
    /// because effects keep re-triggering each other.
    #[error("effect flush exceeded {limit} runs; the remaining queue was dropped")]
    RunawayEffects { limit: usize },
}

impl ReactiveError {
    /// Wrap a user error.
    pub fn callback<E: Into<anyhow::Error>>(err: E) -> Self {
        ReactiveError::CallbackFailed(Arc::new(err.into()))
    }

    pub(crate) fn disposed(node: NodeId, kind: NodeKind) -> Self {
        ReactiveError::DisposedNodeAccessed { node, kind }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ReactiveError::CallbackPanicked { message }
    }

    /// Fold the errors collected during a drain into a single result.
    pub(crate) fn collect(mut errors: Vec<ReactiveError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ReactiveError::Multiple(errors)),
        }
    }

    /// Attempts to downcast a user error to a specific type.
    ///
    /// Looks through `EffectFailed` wrappers.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        match self {
            ReactiveError::CallbackFailed(err) => err.downcast_ref::<E>(),
            ReactiveError::EffectFailed { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// The innermost error, with `EffectFailed` wrappers removed.
    pub fn root(&self) -> &ReactiveError {
        match self {
            ReactiveError::EffectFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` for `CyclicDependency`, looking through wrappers.
    pub fn is_cycle(&self) -> bool {
        matches!(self.root(), ReactiveError::CyclicDependency { .. })
    }

    /// Returns `true` for `DisposedNodeAccessed`, looking through wrappers.
    pub fn is_disposed(&self) -> bool {
        matches!(self.root(), ReactiveError::DisposedNodeAccessed { .. })
    }
}

impl From<anyhow::Error> for ReactiveError {
    fn from(err: anyhow::Error) -> Self {
        ReactiveError::CallbackFailed(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("bad input {0}")]
    struct BadInput(i32);

    #[test]
    fn callback_errors_downcast() {
        let err = ReactiveError::callback(BadInput(3));
        assert_eq!(err.downcast_ref::<BadInput>().map(|e| e.0), Some(3));
        assert_eq!(err.to_string(), "callback failed: bad input 3");
    }

    #[test]
    fn effect_wrapper_is_transparent_to_helpers() {
        let inner = ReactiveError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        let err = ReactiveError::EffectFailed {
            effect: NodeId::new(1, 1),
            source: Box::new(inner),
        };
        assert!(err.is_cycle());
        assert!(!err.is_disposed());
        assert_eq!(err.root().to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn collect_folds_errors() {
        assert!(ReactiveError::collect(Vec::new()).is_ok());

        let one = ReactiveError::collect(vec![ReactiveError::RunawayEffects { limit: 1 }]);
        assert!(matches!(one, Err(ReactiveError::RunawayEffects { limit: 1 })));

        let many = ReactiveError::collect(vec![
            ReactiveError::RunawayEffects { limit: 1 },
            ReactiveError::RunawayEffects { limit: 2 },
        ]);
        assert!(matches!(many, Err(ReactiveError::Multiple(ref errors)) if errors.len() == 2));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = ReactiveError::panicked(Box::new("boom"));
        assert_eq!(err.to_string(), "callback panicked: boom");

        let err = ReactiveError::panicked(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "callback panicked: bang");
    }
}
