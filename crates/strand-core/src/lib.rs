//! strand-core
//!
//! Client-side task execution engine: accepts opaque units of work, routes
//! them through an execution strategy, tracks their lifecycle and recovers
//! from worker faults.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, strategy, task, status, errors, events）
//! - **ports**: 抽象化レイヤー（Callable, IdleScheduler, Accelerator, Clock, IdGenerator）
//! - **impls**: ports の実装（CooperativeIdleScheduler, DelayIdleScheduler, KernelAccelerator など）
//! - **registry**: TaskRegistry（状態の正本）
//! - **queue**: PriorityQueue（ワーカー待ち）
//! - **pool**: WorkerPool（監視付きワーカー）
//! - **engine**: Engine facade + dispatch / chunk / completion
//! - **config** / **observability** / **error**

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod impls;
pub mod observability;
pub mod pool;
pub mod ports;
pub mod queue;
pub mod registry;

pub use crate::config::EngineConfig;
pub use crate::domain::{
    ErrorKind, Priority, Strategy, TaskError, TaskEvent, TaskId, TaskInput, TaskOptions,
    TaskState, TaskStatus, WorkerId,
};
pub use crate::engine::{BuildError, Engine, EngineBuilder};
pub use crate::error::EngineError;
pub use crate::observability::{EngineStats, EngineStatus, InitReport, ShutdownReport};
pub use crate::ports::{CallError, Callable, callable_fn};
