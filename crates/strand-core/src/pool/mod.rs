//! WorkerPool - 固定サイズのワーカー集合
//!
//! # 責務
//! - `pool_size` 個のワーカーを常に維持する（故障しても同じ id で作り直す）
//! - `acquire()` は決してブロックしない（空きが無ければ None）
//! - `release()` で Idle に戻す。キューの drain は Engine 側の責務
//!
//! ワーカー同士は可変状態を共有しない。共有されるのはこの slot 表だけ。

mod worker;

pub use self::worker::{Completion, WorkItem};
pub(crate) use self::worker::{RunError, panic_message, run_callable};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::domain::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{0} was not acquired before submit")]
    NotAcquired(WorkerId),

    #[error("{0} is unavailable")]
    WorkerUnavailable(WorkerId),

    #[error("no such worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("worker pool is shut down")]
    Closed,
}

struct WorkerSlot {
    status: WorkerStatus,
    /// The task this worker is executing (1:1).
    current: Option<TaskId>,
    sender: Option<mpsc::UnboundedSender<WorkItem>>,
    abort: Option<AbortHandle>,
    /// Incremented each time the worker is replaced after a fault.
    generation: u64,
}

struct PoolState {
    slots: Vec<WorkerSlot>,
    closed: bool,
}

pub(crate) struct PoolShared {
    state: Mutex<PoolState>,
    completions: mpsc::UnboundedSender<Completion>,
    faults: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_abort(&self, id: WorkerId, abort: AbortHandle) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        match state.slots.get_mut(id.index()) {
            Some(slot) => {
                slot.abort = Some(abort);
                true
            }
            None => false,
        }
    }

    /// Install a fresh sender after a fault. Returns the in-flight task, or
    /// `None` if the pool is closed.
    fn replace_sender(
        &self,
        id: WorkerId,
        sender: mpsc::UnboundedSender<WorkItem>,
    ) -> Option<Option<TaskId>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let slot = state.slots.get_mut(id.index())?;
        slot.sender = Some(sender);
        slot.abort = None;
        slot.generation += 1;
        Some(slot.current)
    }

    fn mark_idle(&self, id: WorkerId) {
        if let Some(slot) = self.lock().slots.get_mut(id.index()) {
            slot.status = WorkerStatus::Idle;
            slot.current = None;
        }
    }
}

/// Snapshot of worker occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolCounts {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least 1). Must be called inside a tokio runtime.
    pub fn start(size: usize, completions: mpsc::UnboundedSender<Completion>) -> Self {
        let size = size.max(1);
        let mut slots = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            slots.push(WorkerSlot {
                status: WorkerStatus::Idle,
                current: None,
                sender: Some(tx),
                abort: None,
                generation: 0,
            });
            receivers.push(rx);
        }

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                slots,
                closed: false,
            }),
            completions,
            faults: AtomicU64::new(0),
        });

        let supervisors = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| {
                tokio::spawn(worker::supervise(
                    Arc::clone(&shared),
                    WorkerId::new(index),
                    rx,
                ))
            })
            .collect();

        info!(workers = size, "worker pool started");
        Self {
            shared,
            supervisors: Mutex::new(supervisors),
        }
    }

    /// Number of worker records. Constant for the pool's lifetime.
    pub fn size(&self) -> usize {
        self.shared.lock().slots.len()
    }

    /// Claim an Idle worker, or `None` when saturated. Never blocks.
    pub fn acquire(&self) -> Option<WorkerId> {
        let mut state = self.shared.lock();
        if state.closed {
            return None;
        }
        let (index, slot) = state
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.status == WorkerStatus::Idle)?;
        slot.status = WorkerStatus::Busy;
        Some(WorkerId::new(index))
    }

    /// Return a worker to Idle.
    pub fn release(&self, id: WorkerId) {
        self.shared.mark_idle(id);
    }

    /// Hand `item` to an acquired worker. The outcome arrives as a `Completion`.
    pub fn submit(&self, id: WorkerId, item: WorkItem) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        let slot = state
            .slots
            .get_mut(id.index())
            .ok_or(PoolError::UnknownWorker(id))?;
        if slot.status != WorkerStatus::Busy || slot.current.is_some() {
            return Err(PoolError::NotAcquired(id));
        }
        let sender = slot.sender.as_ref().ok_or(PoolError::WorkerUnavailable(id))?;
        let task_id = item.task_id;
        sender
            .send(item)
            .map_err(|_| PoolError::WorkerUnavailable(id))?;
        slot.current = Some(task_id);
        debug!(worker_id = %id, %task_id, "task submitted to worker");
        Ok(())
    }

    pub fn status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.shared.lock().slots.get(id.index()).map(|s| s.status)
    }

    /// Task currently assigned to `id`.
    pub fn current_task(&self, id: WorkerId) -> Option<TaskId> {
        self.shared
            .lock()
            .slots
            .get(id.index())
            .and_then(|s| s.current)
    }

    /// How many times `id` has been replaced.
    pub fn generation(&self, id: WorkerId) -> Option<u64> {
        self.shared
            .lock()
            .slots
            .get(id.index())
            .map(|s| s.generation)
    }

    pub fn counts(&self) -> PoolCounts {
        let state = self.shared.lock();
        let busy = state
            .slots
            .iter()
            .filter(|s| s.status == WorkerStatus::Busy)
            .count();
        PoolCounts {
            total: state.slots.len(),
            busy,
            idle: state.slots.len() - busy,
        }
    }

    /// Total worker replacements since start.
    pub fn faults(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Terminate every worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            for slot in state.slots.iter_mut() {
                slot.sender = None;
                if let Some(abort) = slot.abort.take() {
                    abort.abort();
                }
                slot.status = WorkerStatus::Idle;
                slot.current = None;
            }
        }
        for supervisor in self
            .supervisors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            supervisor.abort();
        }
        info!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
