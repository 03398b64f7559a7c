//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの TaskId
//! - **時刻でソート可能**: 投入順に並ぶのでログが読みやすい
//! - **調整不要で生成可能**: 複数の Engine が同じプロセスにいても衝突しない
//!
//! WorkerId はプール内の安定したインデックス。故障して作り直されても同じ値を引き継ぐ。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a Task (generated at submission, stable for its lifetime).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Stable index of a worker within the pool (`0..pool_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(usize);

impl WorkerId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_display_has_prefix() {
        let ulid = Ulid::new();
        let id = TaskId::from_ulid(ulid);
        assert_eq!(id.as_ulid(), ulid);
        assert_eq!(id.to_string(), format!("task-{ulid}"));
    }

    #[test]
    fn task_ids_are_sortable_by_creation() {
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2)); // 時刻が進むのを待つ
        let id2 = TaskId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }

    #[test]
    fn task_id_serializes_transparently() {
        let id = TaskId::from_ulid(Ulid::new());
        let s = serde_json::to_string(&id).unwrap();
        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(id, back);
        assert_eq!(s, format!("\"{}\"", id.as_ulid()));
    }

    #[test]
    fn worker_id_keeps_index() {
        let w = WorkerId::new(3);
        assert_eq!(w.index(), 3);
        assert_eq!(w.to_string(), "worker-3");
    }
}
