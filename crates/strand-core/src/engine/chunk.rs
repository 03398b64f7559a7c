//! Chunk coordinator
//!
//! 1 つの論理タスクを N 個の Pooled サブタスクに分割する。
//! - サブタスクは親の payload + `ChunkInfo { index, total }` を受け取る
//! - 結果は index 順に集約（完了順ではない）
//! - 1 つでも失敗したら親は即 Failed(ChunkFailure)、残りの兄弟はキャンセル
//!
//! サブタスクは内部用: イベントは出さず、終わったらすぐ registry から消える。

use serde_json::Value;
use tracing::{debug, info};

use super::EngineInner;
use crate::domain::{
    ChunkInfo, ChunkState, ParentRef, TaskError, TaskEvent, TaskId, TaskOptions, TaskRecord,
    TaskState, TransitionPayload,
};

impl EngineInner {
    /// Pending → Chunked, then fan out `total` sub-tasks.
    pub(super) fn start_chunked(&self, id: TaskId, total: usize) {
        let Ok((payload, priority, deadline)) = self
            .registry
            .inspect(id, |r| (r.payload.clone(), r.priority, r.deadline))
        else {
            return;
        };
        if !self
            .registry
            .update(id, |r| {
                if r.state != TaskState::Pending {
                    return false;
                }
                r.chunk = Some(ChunkState::new(total));
                true
            })
            .unwrap_or(false)
        {
            return;
        }

        let now = self.registry.now();
        let child_options = TaskOptions::pooled().with_priority(priority);
        let children: Vec<TaskId> = (0..total)
            .map(|index| {
                let child = self.ids.generate_task_id();
                let mut record = TaskRecord::new(child, payload.clone(), &child_options, priority, now);
                record.parent = Some(ParentRef {
                    parent: id,
                    chunk: ChunkInfo { index, total },
                });
                record.deadline = deadline;
                self.registry.create(record)
            })
            .collect();

        let started = self
            .registry
            .update(id, |r| r.children = children.clone())
            .is_ok()
            && matches!(
                self.registry.compare_and_transition(
                    id,
                    TaskState::Pending,
                    TaskState::Chunked,
                    TransitionPayload::None,
                ),
                Ok(true)
            );
        if !started {
            // canceled before the fan-out finished
            for child in children {
                self.registry.remove(child);
            }
            return;
        }

        debug!(task_id = %id, chunks = total, "chunked task fanned out");
        for child in children {
            self.submit_pooled(child);
        }
    }

    /// Fold one sub-task outcome into its parent.
    pub(super) fn on_chunk_finished(&self, parent: ParentRef, outcome: Result<Value, TaskError>) {
        let ParentRef { parent: id, chunk } = parent;
        match outcome {
            Ok(value) => self.record_chunk(id, chunk, value),
            Err(cause) => {
                let error = TaskError::chunk_failure(chunk.index, &cause);
                let failed = matches!(
                    self.registry.compare_and_transition(
                        id,
                        TaskState::Chunked,
                        TaskState::Failed,
                        TransitionPayload::Error(error),
                    ),
                    Ok(true)
                );
                if !failed {
                    return;
                }
                let _ = self.registry.update(id, |r| {
                    if let Some(state) = r.chunk.as_mut() {
                        state.discard();
                    }
                });
                info!(task_id = %id, chunk = chunk.index, "chunk failed, canceling siblings");
                self.cancel_children(id);
                self.announce(id);
            }
        }
    }

    fn record_chunk(&self, id: TaskId, chunk: ChunkInfo, value: Value) {
        let recorded = self.registry.update(id, |r| {
            if r.state != TaskState::Chunked {
                return None;
            }
            let state = r.chunk.as_mut()?;
            if !state.record(chunk.index, value) {
                return None;
            }
            let done = state.is_complete().then(|| state.take_results());
            Some((state.completed, state.total, state.progress, done))
        });
        let Ok(Some((completed, total, progress, done))) = recorded else {
            return;
        };

        let _ = self.events.send(TaskEvent::Progress {
            task_id: id,
            completed,
            total,
            progress,
        });
        debug!(task_id = %id, completed, total, "chunk completed");

        if let Some(results) = done {
            let completed = matches!(
                self.registry.compare_and_transition(
                    id,
                    TaskState::Chunked,
                    TaskState::Completed,
                    TransitionPayload::Result(Value::Array(results)),
                ),
                Ok(true)
            );
            if completed {
                self.announce(id);
            }
        }
    }

    /// Cancel every outstanding sub-task of `id`. Running ones finish on
    /// their worker and have their outcome discarded.
    pub(super) fn cancel_children(&self, id: TaskId) {
        let children = self
            .registry
            .inspect(id, |r| r.children.clone())
            .unwrap_or_default();
        let mut canceled = 0usize;
        for child in children {
            if matches!(self.cancel(child), Ok(true)) {
                canceled += 1;
            }
        }
        if canceled > 0 {
            debug!(task_id = %id, canceled, "outstanding chunks canceled");
        }
    }
}
