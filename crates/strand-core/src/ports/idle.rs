//! IdleScheduler port - ホストの「アイドル時に実行」プリミティブ
//!
//! Deferred タスクはここに登録される。
//! - `run_when_idle`: 次のアイドルスライス（または timeout）でコールバックを実行
//! - `cancel_idle_request`: まだ走っていない登録を取り消す
//!
//! 実装は `impls::idle` を参照（CooperativeIdleScheduler / DelayIdleScheduler）。

use std::time::Duration;

use futures::future::BoxFuture;

/// Work registered with the idle scheduler.
pub type IdleCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handle of one idle registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdleHandle(u64);

impl IdleHandle {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

pub trait IdleScheduler: Send + Sync {
    /// Run `callback` during the next idle period, or once `timeout` has elapsed
    /// (measured from this call) if the host never goes idle.
    fn run_when_idle(&self, callback: IdleCallback, timeout: Option<Duration>) -> IdleHandle;

    /// Revoke a registration. Returns false if it already ran or was unknown.
    fn cancel_idle_request(&self, handle: IdleHandle) -> bool;

    /// Drop every pending registration and stop background work.
    fn shutdown(&self);
}
