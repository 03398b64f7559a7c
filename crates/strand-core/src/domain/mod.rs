//! Domain model (ids, state machine, task records, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod status;
pub mod strategy;
pub mod task;

pub use self::errors::{ErrorKind, TaskError};
pub use self::events::TaskEvent;
pub use self::ids::{TaskId, WorkerId};
pub use self::state::TaskState;
pub use self::status::TaskStatus;
pub use self::strategy::{Priority, Strategy};
pub use self::task::{
    ChunkInfo, ChunkState, ParentRef, Payload, TaskInput, TaskOptions, TaskRecord, Timestamps,
    TransitionPayload,
};
