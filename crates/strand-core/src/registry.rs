//! TaskRegistry - タスク状態の正本（single source of truth）
//!
//! Design:
//! - 全レコードを 1 つの Mutex<HashMap> に置く
//! - ロックは短く、`.await` を跨いで保持しない
//! - 状態遷移は必ず `transition` / `compare_and_transition` を通す
//!   （終端状態からの遷移は InvalidTransition で拒否）

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{TaskId, TaskRecord, TaskState, TaskStatus, TransitionPayload};
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("invalid transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

pub struct TaskRegistry {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a freshly built record.
    pub fn create(&self, record: TaskRecord) -> TaskId {
        let id = record.id;
        self.lock().insert(id, record);
        id
    }

    /// Status snapshot of one task.
    pub fn get(&self, id: TaskId) -> Result<TaskStatus, RegistryError> {
        let now = self.now();
        self.lock()
            .get(&id)
            .map(|record| TaskStatus::from_record(record, now))
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn state(&self, id: TaskId) -> Result<TaskState, RegistryError> {
        self.lock()
            .get(&id)
            .map(|record| record.state)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Move `id` to `to`. Returns the previous state.
    pub fn transition(
        &self,
        id: TaskId,
        to: TaskState,
        payload: TransitionPayload,
    ) -> Result<TaskState, RegistryError> {
        let now = self.now();
        let mut records = self.lock();
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition { task: id, from, to });
        }
        record.apply(to, payload, now);
        Ok(from)
    }

    /// Move `id` to `to` only if it is currently in `expected`.
    ///
    /// Returns `Ok(false)` (and changes nothing) when another path got there first,
    /// typically a cancellation.
    pub fn compare_and_transition(
        &self,
        id: TaskId,
        expected: TaskState,
        to: TaskState,
        payload: TransitionPayload,
    ) -> Result<bool, RegistryError> {
        let now = self.now();
        let mut records = self.lock();
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if record.state != expected {
            return Ok(false);
        }
        if !expected.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                task: id,
                from: expected,
                to,
            });
        }
        record.apply(to, payload, now);
        Ok(true)
    }

    /// Run `f` against the record under the registry lock.
    pub fn update<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Result<R, RegistryError> {
        let mut records = self.lock();
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(f(record))
    }

    /// Read-only access to a record under the lock.
    pub fn inspect<R>(&self, id: TaskId, f: impl FnOnce(&TaskRecord) -> R) -> Result<R, RegistryError> {
        self.lock()
            .get(&id)
            .map(f)
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskRecord> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn counts_by_state(&self) -> BTreeMap<TaskState, usize> {
        let mut counts = BTreeMap::new();
        for record in self.lock().values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    /// Ids of every task that has not reached a terminal state.
    pub fn live_ids(&self) -> Vec<TaskId> {
        self.lock()
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.id)
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
