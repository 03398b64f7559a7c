//! Worker loop + supervisor.
//!
//! 1 ワーカー = 1 つの tokio タスク。専用の mpsc で WorkItem を 1 件ずつ受け取り、
//! 結果を completion チャネルへ返す。
//!
//! ワーカーが panic する、または callable が `CallError::Fault` を返すと、
//! そのワーカーは死ぬ。監視役（supervisor）が:
//! 1. 実行中だったタスクを WorkerFault として報告し
//! 2. 同じ WorkerId で新しいワーカーを起動する

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::PoolShared;
use crate::domain::{TaskError, TaskId, TaskInput, WorkerId};
use crate::ports::{CallError, Callable};

/// One task handed to a worker.
pub struct WorkItem {
    pub task_id: TaskId,
    pub callable: Arc<dyn Callable>,
    pub input: TaskInput,
    pub deadline: Option<Duration>,
}

/// Outcome of a WorkItem, delivered on the completion channel.
#[derive(Debug, Clone)]
pub struct Completion {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub outcome: Result<Value, TaskError>,
}

/// Why a single execution did not produce a value.
#[derive(Debug)]
pub(crate) enum RunError {
    Call(CallError),
    DeadlineElapsed(Duration),
}

/// Run a callable, enforcing the optional execution deadline.
///
/// On deadline the future is dropped, which cancels the work at its next await.
pub(crate) async fn run_callable(
    callable: &dyn Callable,
    input: TaskInput,
    deadline: Option<Duration>,
) -> Result<Value, RunError> {
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, callable.call(input)).await {
            Ok(result) => result.map_err(RunError::Call),
            Err(_) => Err(RunError::DeadlineElapsed(limit)),
        },
        None => callable.call(input).await.map_err(RunError::Call),
    }
}

enum WorkerExit {
    /// Channel closed: pool shut down.
    Closed,
    /// The callable reported an unstructured failure.
    Fault(String),
}

async fn run_worker(
    worker_id: WorkerId,
    mut items: mpsc::UnboundedReceiver<WorkItem>,
    completions: mpsc::UnboundedSender<Completion>,
) -> WorkerExit {
    while let Some(item) = items.recv().await {
        debug!(%worker_id, task_id = %item.task_id, "worker picked up task");
        let outcome = match run_callable(item.callable.as_ref(), item.input, item.deadline).await {
            Ok(value) => Ok(value),
            Err(RunError::Call(CallError::Failed(message))) => Err(TaskError::execution(message)),
            Err(RunError::Call(CallError::Fault(message))) => return WorkerExit::Fault(message),
            Err(RunError::DeadlineElapsed(limit)) => Err(TaskError::timeout(format!(
                "deadline of {}ms elapsed",
                limit.as_millis()
            ))),
        };

        let completion = Completion {
            worker_id,
            task_id: item.task_id,
            outcome,
        };
        if completions.send(completion).is_err() {
            // engine 側が居なくなった
            return WorkerExit::Closed;
        }
    }
    WorkerExit::Closed
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Keeps one worker slot alive for the lifetime of the pool.
pub(super) async fn supervise(
    shared: Arc<PoolShared>,
    worker_id: WorkerId,
    mut items: mpsc::UnboundedReceiver<WorkItem>,
) {
    loop {
        let worker = tokio::spawn(run_worker(
            worker_id,
            items,
            shared.completions.clone(),
        ));
        if !shared.set_abort(worker_id, worker.abort_handle()) {
            worker.abort();
            break;
        }

        let fault = match worker.await {
            Ok(WorkerExit::Closed) => break,
            Ok(WorkerExit::Fault(message)) => message,
            Err(err) if err.is_panic() => panic_message(err.into_panic()),
            Err(_) => break, // aborted on shutdown
        };

        // 同じ id で作り直す。slot は Busy のまま（故障したタスクを握っている）。
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(in_flight) = shared.replace_sender(worker_id, tx) else {
            break; // pool closed meanwhile
        };
        items = rx;
        shared.faults.fetch_add(1, Ordering::Relaxed);
        warn!(%worker_id, error = %fault, "worker fault, replaced with a fresh worker");

        match in_flight {
            Some(task_id) => {
                let completion = Completion {
                    worker_id,
                    task_id,
                    outcome: Err(TaskError::worker_fault(fault)),
                };
                if shared.completions.send(completion).is_err() {
                    break;
                }
            }
            None => shared.mark_idle(worker_id),
        }
    }
    debug!(%worker_id, "supervisor stopped");
}
