//! Events - ドメインイベント
//!
//! Engine は `tokio::sync::broadcast` でイベントを流す。
//! `Finished` が「完了コールバック」に相当し、auto_cleanup のレコードはこの直後に消える。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::TaskError;
use super::ids::TaskId;
use super::state::TaskState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A chunk of a Chunked task finished.
    Progress {
        task_id: TaskId,
        completed: usize,
        total: usize,
        /// 0.0 - 100.0
        progress: f64,
    },

    /// The task reached a terminal state.
    Finished {
        task_id: TaskId,
        state: TaskState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Progress { task_id, .. } | TaskEvent::Finished { task_id, .. } => *task_id,
        }
    }
}
