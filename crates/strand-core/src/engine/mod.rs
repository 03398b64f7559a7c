//! Engine - 公開される唯一の入口
//!
//! # 構成
//! ```text
//! Engine (facade)
//!   ├─ TaskRegistry    状態の正本
//!   ├─ PriorityQueue   ワーカー待ちのタスク
//!   ├─ WorkerPool      固定サイズのワーカー集合
//!   ├─ IdleScheduler   Deferred 用
//!   └─ Accelerator     Accelerated 用
//! ```
//!
//! - `dispatch`: 戦略ごとの実行経路
//! - `chunk`: Chunked タスクの分割と集約
//! - `completion`: ワーカー結果の受信、終端遷移、イベント通知
//!
//! グローバル状態は持たない。Engine の値がすべてを所有する。

mod builder;
mod chunk;
mod completion;
mod dispatch;

pub use self::builder::{BuildError, EngineBuilder};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::domain::{
    Payload, Strategy, TaskEvent, TaskId, TaskOptions, TaskRecord, TaskState, TaskStatus,
    TransitionPayload,
};
use crate::error::EngineError;
use crate::observability::{EngineStats, EngineStatus, InitReport, ShutdownReport};
use crate::pool::WorkerPool;
use crate::ports::{Accelerator, Callable, Clock, IdGenerator, IdleScheduler};
use crate::queue::PriorityQueue;
use crate::registry::TaskRegistry;

/// Everything the dispatch paths share. Owned by `Engine`; background
/// callbacks only hold a `Weak` to it.
pub(crate) struct EngineInner {
    config: EngineConfig,
    registry: TaskRegistry,
    queue: PriorityQueue,
    pool: WorkerPool,
    idle: Arc<dyn IdleScheduler>,
    accelerator: Arc<dyn Accelerator>,
    ids: Arc<dyn IdGenerator>,
    events: broadcast::Sender<TaskEvent>,
    accelerated_fallbacks: AtomicU64,
    shut_down: AtomicBool,
}

/// Task execution engine.
///
/// # 使用例
/// ```ignore
/// let engine = Engine::initialize(EngineConfig::default().with_max_workers(2))?;
/// let id = engine
///     .submit_task(callable_fn(|_| async { Ok(json!(1)) }), TaskOptions::pooled())
///     .await?;
/// ```
pub struct Engine {
    inner: Arc<EngineInner>,
    completion_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine with default ports. Must be called inside a tokio runtime.
    pub fn initialize(config: EngineConfig) -> Result<Self, BuildError> {
        EngineBuilder::new().config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn start(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        idle: Arc<dyn IdleScheduler>,
        accelerator: Arc<dyn Accelerator>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(config.pool_size(), completions_tx);
        let (events, _) = broadcast::channel(config.event_capacity());

        let inner = Arc::new(EngineInner {
            registry: TaskRegistry::new(clock),
            queue: PriorityQueue::new(),
            pool,
            idle,
            accelerator,
            ids,
            events,
            accelerated_fallbacks: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            config,
        });
        let completion_loop = tokio::spawn(completion::run(Arc::downgrade(&inner), completions_rx));

        info!(workers = inner.pool.size(), "engine initialized");
        Self {
            inner,
            completion_loop: Mutex::new(Some(completion_loop)),
        }
    }

    pub fn report(&self) -> InitReport {
        InitReport {
            worker_count: self.inner.pool.size(),
            status: if self.is_shut_down() {
                EngineStatus::ShutDown
            } else {
                EngineStatus::Initialized
            },
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Register and dispatch a task.
    ///
    /// Immediate and Accelerated tasks have finished when this returns.
    /// Execution failures are recorded on the task, not returned here.
    pub async fn submit_task(
        &self,
        callable: Arc<dyn Callable>,
        options: TaskOptions,
    ) -> Result<TaskId, EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        let chunks = match (options.strategy, options.chunks) {
            (Strategy::Chunked, Some(n)) if n >= 1 => n,
            (Strategy::Chunked, _) => {
                return Err(EngineError::InvalidOptions(
                    "chunked tasks need chunks >= 1".to_string(),
                ));
            }
            _ => 0,
        };

        let inner = &self.inner;
        let priority = options.priority.unwrap_or(inner.config.default_priority);
        let id = inner.ids.generate_task_id();
        let payload = Payload::new(callable, options.args.clone());
        let record = TaskRecord::new(id, payload, &options, priority, inner.registry.now());
        inner.registry.create(record);
        debug!(task_id = %id, strategy = ?options.strategy, ?priority, "task submitted");

        match options.strategy {
            Strategy::Immediate => inner.run_immediate(id).await,
            Strategy::Deferred => inner.schedule_deferred(id),
            Strategy::Pooled => inner.submit_pooled(id),
            Strategy::Chunked => inner.start_chunked(id, chunks),
            Strategy::Accelerated => inner.run_accelerated(id).await,
        }
        Ok(id)
    }

    /// Cancel a task.
    ///
    /// Returns `Ok(false)` when the task was already terminal. Running work is
    /// not interrupted; its result is discarded.
    pub fn cancel_task(&self, id: TaskId) -> Result<bool, EngineError> {
        Ok(self.inner.cancel(id)?)
    }

    pub fn task_status(&self, id: TaskId) -> Result<TaskStatus, EngineError> {
        Ok(self.inner.registry.get(id)?)
    }

    /// Drop a retained (`auto_cleanup = false`) record. Live tasks are canceled first.
    pub fn remove_task(&self, id: TaskId) -> Result<(), EngineError> {
        let canceled = self.inner.cancel(id)?;
        // auto_cleanup tasks are already gone once the cancel is announced
        let removed = self.inner.registry.remove(id).is_some();
        if canceled || removed {
            Ok(())
        } else {
            Err(EngineError::TaskNotFound(id))
        }
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats::new(
            inner.registry.counts_by_state(),
            inner.pool.counts(),
            inner.queue.len(),
            inner.pool.faults(),
            inner.accelerated_fallbacks.load(Ordering::Relaxed),
        )
    }

    /// Progress and completion events. Lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel everything, stop workers and forget every task. Idempotent.
    pub fn shutdown(&self) -> ShutdownReport {
        let report = ShutdownReport {
            status: EngineStatus::ShutDown,
        };
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return report;
        }

        let live = inner.registry.live_ids();
        let canceled = live
            .iter()
            .filter(|id| matches!(inner.cancel(**id), Ok(true)))
            .count();
        inner.idle.shutdown();
        inner.queue.clear();
        inner.pool.shutdown();
        if let Some(handle) = self
            .completion_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        inner.registry.clear();

        info!(canceled, "engine shut down");
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineInner {
    /// Cancel `id` from whatever non-terminal state it is in.
    fn cancel(&self, id: TaskId) -> Result<bool, crate::registry::RegistryError> {
        loop {
            let (state, idle_handle, parent) = self
                .registry
                .inspect(id, |r| (r.state, r.idle_handle, r.parent))?;
            if state.is_terminal() {
                return Ok(false);
            }
            if !self.registry.compare_and_transition(
                id,
                state,
                TaskState::Canceled,
                TransitionPayload::None,
            )? {
                // lost a race with another transition; look again
                continue;
            }

            match state {
                TaskState::Queued => {
                    self.queue.remove(id);
                }
                TaskState::Scheduled => {
                    if let Some(handle) = idle_handle {
                        self.idle.cancel_idle_request(handle);
                    }
                }
                TaskState::Chunked => self.cancel_children(id),
                _ => {}
            }
            info!(task_id = %id, from = %state, "task canceled");

            if parent.is_some() {
                self.registry.remove(id);
            } else {
                self.announce(id);
            }
            return Ok(true);
        }
    }
}
