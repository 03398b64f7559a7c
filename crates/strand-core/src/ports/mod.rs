//! Ports - 抽象化レイヤー
//!
//! Engine が依存する外部能力を trait として定義します。
//! - Callable: 実行される仕事そのもの
//! - IdleScheduler: ホストのアイドル検出
//! - Accelerator: 高速化コンテキストの準備
//! - Clock / IdGenerator: 時刻と ID（テストで差し替え可能）

pub mod accelerator;
pub mod callable;
pub mod clock;
pub mod id_generator;
pub mod idle;

pub use self::accelerator::{Accelerator, AcceleratorError};
pub use self::callable::{CallError, Callable, FnCallable, callable_fn};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::idle::{IdleCallback, IdleHandle, IdleScheduler};
