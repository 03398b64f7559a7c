//! Task record: metadata + payload.
//!
//! Design:
//! - TaskRecord は状態の正本（TaskRegistry の中にだけ存在する）
//! - 状態遷移は `apply()` 経由でのみ行う（検証は registry 側）
//! - PriorityQueue や WorkerPool は TaskId だけを持つ

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::TaskError;
use super::ids::{TaskId, WorkerId};
use super::state::TaskState;
use super::strategy::{Priority, Strategy};
use crate::ports::{Callable, IdleHandle};

/// Submission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    pub strategy: Strategy,

    /// `None` means the engine's configured default.
    #[serde(default)]
    pub priority: Option<Priority>,

    /// Argument bundle handed to the callable untouched.
    #[serde(default)]
    pub args: Value,

    /// Deferred only: run even if the host never goes idle, measured from scheduling.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Optional execution deadline for Immediate/Pooled/Chunked/Accelerated work.
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,

    /// Chunked only: number of sub-tasks.
    #[serde(default)]
    pub chunks: Option<usize>,

    /// Accelerated only: name of the kernel to prepare.
    #[serde(default)]
    pub kernel: Option<String>,
}

fn default_auto_cleanup() -> bool {
    true
}

impl TaskOptions {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            priority: None,
            args: Value::Null,
            timeout_ms: None,
            deadline_ms: None,
            auto_cleanup: default_auto_cleanup(),
            chunks: None,
            kernel: None,
        }
    }

    pub fn immediate() -> Self {
        Self::new(Strategy::Immediate)
    }

    pub fn deferred() -> Self {
        Self::new(Strategy::Deferred)
    }

    pub fn pooled() -> Self {
        Self::new(Strategy::Pooled)
    }

    pub fn chunked(chunks: usize) -> Self {
        Self::new(Strategy::Chunked).with_chunks(chunks)
    }

    pub fn accelerated() -> Self {
        Self::new(Strategy::Accelerated)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = Some(kernel.into());
        self
    }

    /// Keep the registry entry after the task finishes (`auto_cleanup = false`).
    pub fn retained(mut self) -> Self {
        self.auto_cleanup = false;
        self
    }
}

/// Position of a sub-task inside its Chunked parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub total: usize,
}

/// What a callable receives on every invocation.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task_id: TaskId,
    pub args: Value,
    pub chunk: Option<ChunkInfo>,
}

/// Opaque unit of work: a registered callable plus its argument bundle.
#[derive(Clone)]
pub struct Payload {
    pub callable: Arc<dyn Callable>,
    pub args: Value,
}

impl Payload {
    pub fn new(callable: Arc<dyn Callable>, args: Value) -> Self {
        Self { callable, args }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("callable", &"<dyn Callable>")
            .field("args", &self.args)
            .finish()
    }
}

/// Aggregation slots of a Chunked parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkState {
    pub total: usize,
    pub results: Vec<Option<Value>>,
    pub completed: usize,
    /// 0.0 - 100.0
    pub progress: f64,
}

impl ChunkState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: vec![None; total],
            completed: 0,
            progress: 0.0,
        }
    }

    /// Store one chunk result. Returns false for out-of-range or duplicate writes.
    pub fn record(&mut self, index: usize, value: Value) -> bool {
        let Some(slot) = self.results.get_mut(index) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.completed += 1;
        self.progress = self.completed as f64 * 100.0 / self.total as f64;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// Index-aligned results. Only meaningful once `is_complete()`.
    pub fn take_results(&mut self) -> Vec<Value> {
        self.results
            .iter_mut()
            .map(|slot| slot.take().unwrap_or(Value::Null))
            .collect()
    }

    /// Drop everything collected so far (failure path: no partial results).
    pub fn discard(&mut self) {
        self.results.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Parent link of a chunk sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub parent: TaskId,
    pub chunk: ChunkInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Extra data carried by a transition.
#[derive(Debug, Clone)]
pub enum TransitionPayload {
    None,
    /// Running on this pool worker.
    Worker(WorkerId),
    Result(Value),
    Error(TaskError),
}

/// The registry's record of one task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub payload: Payload,
    pub strategy: Strategy,
    pub priority: Priority,
    pub state: TaskState,
    pub timestamps: Timestamps,

    pub result: Option<Value>,
    pub error: Option<TaskError>,

    pub auto_cleanup: bool,

    /// Set only while Running on a pool worker.
    pub worker: Option<WorkerId>,

    /// Chunked parents only.
    pub chunk: Option<ChunkState>,
    /// Chunked parents only: ids of the sub-tasks.
    pub children: Vec<TaskId>,
    /// Chunk sub-tasks only.
    pub parent: Option<ParentRef>,

    /// Deferred tasks while Scheduled.
    pub idle_handle: Option<IdleHandle>,

    pub timeout: Option<Duration>,
    pub deadline: Option<Duration>,
    pub kernel: Option<String>,

    /// Accelerated tasks: true when the prepared context was used, false after fallback.
    pub accelerated: bool,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        payload: Payload,
        options: &TaskOptions,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            strategy: options.strategy,
            priority,
            state: TaskState::Pending,
            timestamps: Timestamps {
                created_at: now,
                queued_at: None,
                started_at: None,
                completed_at: None,
            },
            result: None,
            error: None,
            auto_cleanup: options.auto_cleanup,
            worker: None,
            chunk: None,
            children: Vec::new(),
            parent: None,
            idle_handle: None,
            timeout: options.timeout_ms.map(Duration::from_millis),
            deadline: options.deadline_ms.map(Duration::from_millis),
            kernel: options.kernel.clone(),
            accelerated: false,
        }
    }

    /// Input handed to the callable for this task.
    pub fn input(&self) -> TaskInput {
        TaskInput {
            task_id: self.id,
            args: self.payload.args.clone(),
            chunk: self.parent.map(|p| p.chunk),
        }
    }

    /// Apply an already validated transition.
    ///
    /// Timestamps are set once; `worker` only survives while Running.
    pub fn apply(&mut self, to: TaskState, payload: TransitionPayload, now: DateTime<Utc>) {
        self.state = to;
        match to {
            TaskState::Queued => {
                self.timestamps.queued_at.get_or_insert(now);
            }
            TaskState::Running => {
                self.timestamps.started_at.get_or_insert(now);
                self.idle_handle = None;
            }
            TaskState::Chunked => {
                self.timestamps.started_at.get_or_insert(now);
            }
            _ => {}
        }
        if to != TaskState::Running {
            self.worker = None;
        }
        if to.is_terminal() {
            self.timestamps.completed_at.get_or_insert(now);
            self.idle_handle = None;
        }

        match payload {
            TransitionPayload::None => {}
            TransitionPayload::Worker(worker) => {
                if to == TaskState::Running {
                    self.worker = Some(worker);
                }
            }
            TransitionPayload::Result(value) => {
                if to == TaskState::Completed {
                    self.result = Some(value);
                }
            }
            TransitionPayload::Error(error) => {
                if to == TaskState::Failed {
                    self.error = Some(error);
                }
            }
        }
        if to == TaskState::Completed && self.result.is_none() {
            self.result = Some(Value::Null);
        }
    }

    /// Percent complete: chunk progress for Chunked parents, 100 once Completed.
    pub fn progress(&self) -> f64 {
        match (&self.chunk, self.state) {
            (_, TaskState::Completed) => 100.0,
            (Some(chunk), _) => chunk.progress,
            _ => 0.0,
        }
    }
}
