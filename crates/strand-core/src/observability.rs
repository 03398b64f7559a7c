//! Observability - Engine の状態を外から見るためのビュー
//!
//! すべて serde でシリアライズ可能（CLI はそのまま JSON で出力する）。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::TaskState;
use crate::pool::PoolCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Initialized,
    ShutDown,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Initialized => write!(f, "initialized"),
            EngineStatus::ShutDown => write!(f, "shut_down"),
        }
    }
}

/// Returned by `Engine::report()` right after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    pub worker_count: usize,
    pub status: EngineStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub status: EngineStatus,
}

/// Aggregate counters of one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Records currently held by the registry (auto-cleaned tasks are gone).
    pub total_tasks: usize,
    pub tasks_by_state: BTreeMap<TaskState, usize>,
    pub workers_total: usize,
    pub workers_active: usize,
    pub workers_available: usize,
    /// workers_active / workers_total, 0.0 - 100.0
    pub utilization_percent: f64,
    pub queued: usize,
    pub worker_faults: u64,
    pub accelerated_fallbacks: u64,
}

impl EngineStats {
    pub(crate) fn new(
        tasks_by_state: BTreeMap<TaskState, usize>,
        workers: PoolCounts,
        queued: usize,
        worker_faults: u64,
        accelerated_fallbacks: u64,
    ) -> Self {
        let utilization_percent = if workers.total == 0 {
            0.0
        } else {
            workers.busy as f64 * 100.0 / workers.total as f64
        };
        Self {
            total_tasks: tasks_by_state.values().sum(),
            tasks_by_state,
            workers_total: workers.total,
            workers_active: workers.busy,
            workers_available: workers.idle,
            utilization_percent,
            queued,
            worker_faults,
            accelerated_fallbacks,
        }
    }

    /// Tasks in `state`, zero when absent.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks_by_state.get(&state).copied().unwrap_or(0)
    }
}
