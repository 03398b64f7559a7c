//! Completion - 終端遷移とイベント通知
//!
//! 1. ワーカーから Completion を受け取る（単一ループ）
//! 2. ワーカーを Idle に戻す
//! 3. Running → Completed / Failed（キャンセル済みなら結果は捨てる）
//! 4. chunk の子なら親へ集約、そうでなければ Finished を通知
//! 5. auto_cleanup ならレコードを消す
//! 6. キューを drain する

use std::sync::Weak;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::EngineInner;
use crate::domain::{TaskError, TaskEvent, TaskId, TaskState, TransitionPayload};
use crate::pool::Completion;
use crate::registry::RegistryError;

/// Drains the pool's completion channel for the lifetime of the engine.
pub(super) async fn run(engine: Weak<EngineInner>, mut completions: mpsc::UnboundedReceiver<Completion>) {
    while let Some(completion) = completions.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.on_completion(completion);
    }
    debug!("completion loop stopped");
}

impl EngineInner {
    fn on_completion(&self, completion: Completion) {
        let Completion {
            worker_id,
            task_id,
            outcome,
        } = completion;
        self.pool.release(worker_id);
        self.finish(task_id, outcome);
        self.drain();
    }

    /// Record the outcome of a Running task.
    ///
    /// A task that is no longer Running (canceled, or already cleaned up)
    /// keeps its state; the outcome is dropped.
    pub(super) fn finish(&self, id: TaskId, outcome: Result<Value, TaskError>) {
        let parent = match self.registry.inspect(id, |r| r.parent) {
            Ok(parent) => parent,
            Err(_) => {
                debug!(task_id = %id, "outcome for a removed task discarded");
                return;
            }
        };

        let (to, payload) = match &outcome {
            Ok(value) => (TaskState::Completed, TransitionPayload::Result(value.clone())),
            Err(err) => (TaskState::Failed, TransitionPayload::Error(err.clone())),
        };
        match self
            .registry
            .compare_and_transition(id, TaskState::Running, to, payload)
        {
            Ok(true) => {}
            Ok(false) | Err(RegistryError::NotFound(_)) => {
                debug!(task_id = %id, "task no longer running, outcome discarded");
                return;
            }
            Err(err) => {
                error!(task_id = %id, error = %err, "state machine violation");
                return;
            }
        }

        match parent {
            Some(parent) => {
                // sub-tasks are internal: no event, no retained record
                self.registry.remove(id);
                self.on_chunk_finished(parent, outcome);
            }
            None => self.announce(id),
        }
    }

    /// Broadcast `Finished` for a terminal task and apply auto_cleanup.
    pub(super) fn announce(&self, id: TaskId) {
        let Ok((state, result, error, auto_cleanup)) = self.registry.inspect(id, |r| {
            (r.state, r.result.clone(), r.error.clone(), r.auto_cleanup)
        }) else {
            return;
        };
        match &error {
            Some(err) => info!(task_id = %id, %state, error = %err, "task finished"),
            None => info!(task_id = %id, %state, "task finished"),
        }

        // no subscribers is fine
        let _ = self.events.send(TaskEvent::Finished {
            task_id: id,
            state,
            result,
            error,
        });
        if auto_cleanup {
            self.registry.remove(id);
        }
    }
}
