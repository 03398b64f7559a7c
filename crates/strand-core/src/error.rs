use thiserror::Error;

use crate::domain::{TaskId, TaskState};
use crate::pool::PoolError;
use crate::registry::RegistryError;

/// Hard errors surfaced to callers of the engine facade.
///
/// Execution failures are not here: they are recorded on the task (`TaskError`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Internal invariant violation (e.g. leaving a terminal state).
    #[error("invalid transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("invalid task options: {0}")]
    InvalidOptions(String),

    #[error("engine has been shut down")]
    ShutDown,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => EngineError::TaskNotFound(id),
            RegistryError::InvalidTransition { task, from, to } => {
                EngineError::InvalidTransition { task, from, to }
            }
        }
    }
}
