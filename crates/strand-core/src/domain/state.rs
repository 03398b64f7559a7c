//! Task state machine.

use serde::{Deserialize, Serialize};

/// TaskState はタスクの状態を表現
///
/// State transitions:
/// - Pending -> Running -> {Completed, Failed}            (Immediate)
/// - Pending -> Scheduled -> Running -> ...               (Deferred)
/// - Pending -> [Queued ->] Running -> ...                (Pooled / chunk)
/// - Pending -> Chunked -> {Completed, Failed}            (Chunked parent)
/// - Pending -> Loading -> Running -> ...                 (Accelerated)
/// - any non-terminal -> Canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet routed.
    Pending,

    /// Waiting in the priority queue for a free worker.
    Queued,

    /// Registered with the idle scheduler.
    Scheduled,

    /// Preparing the accelerated execution context.
    Loading,

    /// Currently executing.
    Running,

    /// Split into sub-tasks; waiting for them to finish.
    Chunked,

    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub const ALL: [TaskState; 9] = [
        TaskState::Pending,
        TaskState::Queued,
        TaskState::Scheduled,
        TaskState::Loading,
        TaskState::Running,
        TaskState::Chunked,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Canceled,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match self {
            Pending => matches!(
                next,
                Queued | Scheduled | Loading | Running | Chunked | Failed | Canceled
            ),
            Queued | Scheduled => matches!(next, Running | Canceled),
            Loading => matches!(next, Running | Failed | Canceled),
            Running | Chunked => matches!(next, Completed | Failed | Canceled),
            Completed | Failed | Canceled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Scheduled => "scheduled",
            TaskState::Loading => "loading",
            TaskState::Running => "running",
            TaskState::Chunked => "chunked",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
