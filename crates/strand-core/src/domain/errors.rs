//! Errors - タスクに記録される実行エラー
//!
//! 実行レベルのエラーは Engine の境界を越えて投げられず、TaskRecord に保存される。
//! 呼び出し側は `task_status` か `TaskEvent::Finished` で受け取る。

use serde::{Deserialize, Serialize};

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The callable itself returned an error (or panicked on an inline path).
    TaskExecution,

    /// The worker running the task died; the worker has been replaced.
    WorkerFault,

    /// A chunk sub-task failed; `chunk_index` says which one.
    ChunkFailure,

    /// The optional execution deadline elapsed.
    Timeout,
}

/// TaskError is what a failed task carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            chunk_index: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TaskExecution, message)
    }

    pub fn worker_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerFault, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Wrap a sub-task error as the parent's failure.
    pub fn chunk_failure(chunk_index: usize, cause: &TaskError) -> Self {
        Self {
            kind: ErrorKind::ChunkFailure,
            message: format!("chunk {chunk_index} failed: {}", cause.message),
            chunk_index: Some(chunk_index),
        }
    }
}
