//! Strategy dispatch - 戦略ごとの実行経路
//!
//! | Strategy    | 経路                                                   |
//! |-------------|--------------------------------------------------------|
//! | Immediate   | submit_task の中でそのまま await                         |
//! | Deferred    | IdleScheduler に登録 → アイドル時（or timeout）に実行     |
//! | Pooled      | 空きワーカーへ。無ければ PriorityQueue                    |
//! | Chunked     | `chunk` モジュールへ                                    |
//! | Accelerated | Accelerator::prepare → 失敗なら黙って Immediate と同じ経路 |
//!
//! 状態遷移はすべて compare_and_transition。キャンセルと競合したら負けた側は何もしない。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::EngineInner;
use crate::domain::{TaskError, TaskId, TaskInput, TaskState, TransitionPayload, WorkerId};
use crate::pool::{RunError, WorkItem, panic_message, run_callable};
use crate::ports::{CallError, Callable};
use crate::registry::RegistryError;

/// Run a callable on the current task, catching panics.
///
/// There is no worker to replace here, so every failure is a `TaskExecution`
/// error (or `Timeout`).
pub(super) async fn execute_inline(
    callable: Arc<dyn Callable>,
    input: TaskInput,
    deadline: Option<Duration>,
) -> Result<Value, TaskError> {
    let run = AssertUnwindSafe(run_callable(callable.as_ref(), input, deadline))
        .catch_unwind()
        .await;
    match run {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(RunError::Call(CallError::Failed(message) | CallError::Fault(message)))) => {
            Err(TaskError::execution(message))
        }
        Ok(Err(RunError::DeadlineElapsed(limit))) => Err(TaskError::timeout(format!(
            "deadline of {}ms elapsed",
            limit.as_millis()
        ))),
        Err(panic) => Err(TaskError::execution(format!(
            "task panicked: {}",
            panic_message(panic)
        ))),
    }
}

impl EngineInner {
    /// CAS helper: `Ok(false)` (or a missing record) means another path won.
    fn advance(
        &self,
        id: TaskId,
        expected: TaskState,
        to: TaskState,
        payload: TransitionPayload,
    ) -> bool {
        match self.registry.compare_and_transition(id, expected, to, payload) {
            Ok(moved) => moved,
            Err(RegistryError::NotFound(_)) => false,
            Err(err) => {
                error!(task_id = %id, error = %err, "state machine violation");
                false
            }
        }
    }

    /// What a worker (or the inline path) needs to run `id`.
    fn work_for(&self, id: TaskId) -> Option<(Arc<dyn Callable>, TaskInput, Option<Duration>)> {
        self.registry
            .inspect(id, |r| (Arc::clone(&r.payload.callable), r.input(), r.deadline))
            .ok()
    }

    /// Pending → Running → terminal, on the caller's task.
    pub(super) async fn run_immediate(&self, id: TaskId) {
        if !self.advance(id, TaskState::Pending, TaskState::Running, TransitionPayload::None) {
            return;
        }
        let Some((callable, input, deadline)) = self.work_for(id) else {
            return;
        };
        let outcome = execute_inline(callable, input, deadline).await;
        self.finish(id, outcome);
    }

    /// Pending → Scheduled, then Running on the next idle slice.
    pub(super) fn schedule_deferred(self: &Arc<Self>, id: TaskId) {
        if !self.advance(id, TaskState::Pending, TaskState::Scheduled, TransitionPayload::None) {
            return;
        }
        let timeout = self.registry.inspect(id, |r| r.timeout).ok().flatten();

        let engine = Arc::downgrade(self);
        let handle = self.idle.run_when_idle(
            Box::new(move || {
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.run_deferred(id).await;
                    }
                }
                .boxed()
            }),
            timeout,
        );

        // the callback may already have run (zero delay); only a Scheduled task keeps the handle
        let _ = self.registry.update(id, |r| {
            if r.state == TaskState::Scheduled {
                r.idle_handle = Some(handle);
            }
        });
        debug!(task_id = %id, handle = handle.value(), ?timeout, "deferred task scheduled");
    }

    async fn run_deferred(&self, id: TaskId) {
        if !self.advance(id, TaskState::Scheduled, TaskState::Running, TransitionPayload::None) {
            debug!(task_id = %id, "idle callback fired for a task that is no longer scheduled");
            return;
        }
        let Some((callable, input, deadline)) = self.work_for(id) else {
            return;
        };
        let outcome = execute_inline(callable, input, deadline).await;
        self.finish(id, outcome);
    }

    /// Pending → Running on a free worker, or Pending → Queued.
    pub(super) fn submit_pooled(&self, id: TaskId) {
        if let Some(worker) = self.pool.acquire() {
            if !self.start_on_worker(worker, id, TaskState::Pending) {
                self.pool.release(worker);
                self.drain();
            }
            return;
        }

        let Ok(priority) = self.registry.inspect(id, |r| r.priority) else {
            return;
        };
        if !self.advance(id, TaskState::Pending, TaskState::Queued, TransitionPayload::None) {
            return;
        }
        self.queue.push(id, priority);
        debug!(task_id = %id, ?priority, queued = self.queue.len(), "pool saturated, task queued");

        // a worker may have been released between acquire() and push()
        self.drain();
    }

    /// Move `id` from `expected` to Running on `worker` and hand it over.
    ///
    /// Returns false when the task is no longer in `expected`; the caller
    /// still owns the worker then.
    fn start_on_worker(&self, worker: WorkerId, id: TaskId, expected: TaskState) -> bool {
        if !self.advance(id, expected, TaskState::Running, TransitionPayload::Worker(worker)) {
            return false;
        }
        let Some((callable, input, deadline)) = self.work_for(id) else {
            // removed between the transition and here (shutdown)
            self.pool.release(worker);
            return true;
        };
        let item = WorkItem {
            task_id: id,
            callable,
            input,
            deadline,
        };
        if let Err(err) = self.pool.submit(worker, item) {
            warn!(task_id = %id, worker_id = %worker, error = %err, "could not hand task to worker");
            self.pool.release(worker);
            self.finish(id, Err(TaskError::worker_fault(err.to_string())));
        } else {
            debug!(task_id = %id, worker_id = %worker, "task dispatched");
        }
        true
    }

    /// Hand queued tasks to idle workers until one side runs out.
    pub(super) fn drain(&self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.pool.acquire() else {
                return;
            };
            let mut dispatched = false;
            while let Some(entry) = self.queue.pop() {
                if self.start_on_worker(worker, entry.task_id, TaskState::Queued) {
                    dispatched = true;
                    break;
                }
                // stale entry: canceled (or removed) while waiting
            }
            if !dispatched {
                self.pool.release(worker);
                return;
            }
        }
    }

    /// Pending → Loading → Running with the prepared callable, or the task's own one.
    pub(super) async fn run_accelerated(&self, id: TaskId) {
        if !self.advance(id, TaskState::Pending, TaskState::Loading, TransitionPayload::None) {
            return;
        }
        let Ok((payload, kernel)) = self
            .registry
            .inspect(id, |r| (r.payload.clone(), r.kernel.clone()))
        else {
            return;
        };

        let callable = match self.accelerator.prepare(&payload, kernel.as_deref()).await {
            Ok(accelerated) => {
                let _ = self.registry.update(id, |r| r.accelerated = true);
                accelerated
            }
            Err(err) => {
                self.accelerated_fallbacks.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %id, error = %err, "falling back to immediate execution");
                Arc::clone(&payload.callable)
            }
        };

        if !self.advance(id, TaskState::Loading, TaskState::Running, TransitionPayload::None) {
            return;
        }
        let Some((_, input, deadline)) = self.work_for(id) else {
            return;
        };
        let outcome = execute_inline(callable, input, deadline).await;
        self.finish(id, outcome);
    }
}
