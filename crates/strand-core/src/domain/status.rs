//! TaskStatus - API 向けのシリアライズ可能なビュー
//!
//! TaskRecord は callable を抱えているので外に出さない。
//! 呼び出し側にはこのスナップショットを返す。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::TaskError;
use super::ids::{TaskId, WorkerId};
use super::state::TaskState;
use super::strategy::{Priority, Strategy};
use super::task::TaskRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub strategy: Strategy,
    pub priority: Priority,
    /// 0.0 - 100.0
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// started -> completed, or started -> now while still running.
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskStatus {
    pub fn from_record(record: &TaskRecord, now: DateTime<Utc>) -> Self {
        let ts = record.timestamps;
        let duration_ms = ts
            .started_at
            .map(|started| (ts.completed_at.unwrap_or(now) - started).num_milliseconds());
        Self {
            task_id: record.id,
            state: record.state,
            strategy: record.strategy,
            priority: record.priority,
            progress: record.progress(),
            created_at: ts.created_at,
            queued_at: ts.queued_at,
            started_at: ts.started_at,
            completed_at: ts.completed_at,
            duration_ms,
            worker: record.worker,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
