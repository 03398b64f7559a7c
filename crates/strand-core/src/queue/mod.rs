//! PriorityQueue - ワーカー待ちの Pooled タスク
//!
//! - 同じ priority 内は FIFO（enqueue 順）
//! - priority が違えば番号の小さい方が必ず先
//! - 低優先度のタスクは、高優先度の投入が続く限り待たされ続ける（許容済みの挙動）

mod entry;

pub use entry::QueueEntry;

use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::domain::{Priority, TaskId};

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, task_id: TaskId, priority: Priority) {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueueEntry {
            priority,
            enqueued_at: Instant::now(),
            seq,
            task_id,
        });
    }

    /// Most urgent entry: lowest priority number, then earliest enqueued.
    pub fn pop(&self) -> Option<QueueEntry> {
        self.lock().heap.pop()
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.lock().heap.peek().cloned()
    }

    /// Drop `task_id` from the queue (cancellation). Returns true if it was queued.
    pub fn remove(&self, task_id: TaskId) -> bool {
        let mut state = self.lock();
        let before = state.heap.len();
        state.heap.retain(|entry| entry.task_id != task_id);
        state.heap.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Empty the queue, returning what was waiting.
    pub fn clear(&self) -> Vec<TaskId> {
        self.lock()
            .heap
            .drain()
            .map(|entry| entry.task_id)
            .collect()
    }
}
