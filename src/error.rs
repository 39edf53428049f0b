//! Engine error types.
//!
//! Invariant violations and host-binding failures are fatal to the
//! in-progress render: the work-in-progress generation is discarded and the
//! dirty lanes stay pending, so the next scheduling pass rebuilds from the
//! committed tree.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Failure reported by a host binding operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Fatal render-phase errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A component called a different number of hooks than on its previous
    /// render. The hook list is matched purely by call position, so this
    /// would corrupt every later hook's state.
    #[error("hook order mismatch: component called {found} hooks, previous render called {expected}")]
    HookOrderMismatch { expected: usize, found: usize },

    /// A hook at a given call position changed kind between renders
    /// (e.g. a state hook where an effect hook used to be).
    #[error("hook kind mismatch at call position {index}")]
    HookKindMismatch { index: usize },

    /// A node required its counterpart in the other buffer generation and
    /// none was linked.
    #[error("fiber is missing its expected alternate")]
    MissingAlternate,

    /// The host binding failed; the render aborts and will be retried from
    /// the committed tree on the next scheduling pass.
    #[error("host binding failure: {0}")]
    Host(#[from] HostError),
}
