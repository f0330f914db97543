//! Error taxonomy for the execution core
//!
//! All errors surface synchronously from the calling control path. Worker
//! threads never panic on these: thread-side failures are logged and park
//! the worker in `Paused`.

use crate::exec::ExecutionState;
use thiserror::Error;

/// Errors raised by operators, workers and the hook system
#[derive(Debug, Error)]
pub enum Error {
    /// A control method was called in a state that does not admit it
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidLifecycleTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// Construction-time or attach-time configuration problem
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Detaching a hook with dependents, or a required-hook cycle
    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    /// The data iterator produced no blocks for the worker's first epoch
    #[error("worker {index} initialisation failed: data iterator produced no blocks")]
    WorkerInitialisationFailure { index: usize },

    /// More replicas pushed for an epoch than there are workers
    #[error("epoch {epoch} already holds {capacity} pushed replicas")]
    MergerMismatch { epoch: usize, capacity: usize },

    /// Propagated from the tensor backend
    #[error("backend error: {0}")]
    BackendError(String),
}

/// Result type for execution-core operations
pub type Result<T> = std::result::Result<T, Error>;
