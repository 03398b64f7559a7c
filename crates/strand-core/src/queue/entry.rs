//! Queue entry ordering.

use std::cmp::Ordering;
use std::time::Instant;

use crate::domain::{Priority, TaskId};

/// `(priority, enqueue time, task)` waiting for a worker.
///
/// We use reversed ordering so BinaryHeap acts as a min-heap:
/// lowest priority number first, then earliest enqueued.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Tie-breaker: two pushes can observe the same `Instant`.
    pub(super) seq: u64,
    pub task_id: TaskId,
}

// equality follows `cmp`: `enqueued_at` is informational only
impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
