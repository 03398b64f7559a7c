//! IdleScheduler の実装
//!
//! - **CooperativeIdleScheduler**: 単一ループの協調スケジューラ。ホストが
//!   `report_idle()` でアイドルスライスを通知すると、登録済みのコールバックを
//!   1 つずつ順番に実行する。timeout を過ぎたものはアイドルでなくても実行する。
//! - **DelayIdleScheduler**: アイドル検出を持たないホスト向けのフォールバック。
//!   「N ms 後に実行」するだけ。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::ports::{IdleCallback, IdleHandle, IdleScheduler};

struct IdleRequest {
    callback: IdleCallback,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct CooperativeState {
    /// Registration order == handle order.
    pending: BTreeMap<IdleHandle, IdleRequest>,
    /// An idle slice was reported and not consumed yet.
    idle: bool,
    closed: bool,
}

struct CooperativeShared {
    state: Mutex<CooperativeState>,
    wake: Notify,
    next_handle: AtomicU64,
}

impl CooperativeShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, CooperativeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-loop cooperative scheduler driven by host idle reports.
///
/// # 使用例
/// ```ignore
/// let idle = Arc::new(CooperativeIdleScheduler::new());
/// let engine = EngineBuilder::new().idle_scheduler(idle.clone()).build()?;
/// // host event loop:
/// idle.report_idle();
/// ```
pub struct CooperativeIdleScheduler {
    shared: Arc<CooperativeShared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl CooperativeIdleScheduler {
    /// Must be called inside a tokio runtime: the driver loop is spawned here.
    pub fn new() -> Self {
        let shared = Arc::new(CooperativeShared {
            state: Mutex::new(CooperativeState::default()),
            wake: Notify::new(),
            next_handle: AtomicU64::new(1),
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared)));
        Self {
            shared,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// The host reports an idle slice: everything registered so far runs.
    pub fn report_idle(&self) {
        self.shared.lock().idle = true;
        self.shared.wake.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl Default for CooperativeIdleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleScheduler for CooperativeIdleScheduler {
    fn run_when_idle(&self, callback: IdleCallback, timeout: Option<Duration>) -> IdleHandle {
        let handle = IdleHandle::new(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        let deadline = timeout.map(|t| Instant::now() + t);
        self.shared
            .lock()
            .pending
            .insert(handle, IdleRequest { callback, deadline });
        self.shared.wake.notify_one();
        handle
    }

    fn cancel_idle_request(&self, handle: IdleHandle) -> bool {
        self.shared.lock().pending.remove(&handle).is_some()
    }

    fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.closed = true;
            state.pending.clear();
        }
        self.shared.wake.notify_one();
        if let Some(driver) = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            driver.abort();
        }
    }
}

impl Drop for CooperativeIdleScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drive(shared: Arc<CooperativeShared>) {
    loop {
        let (ready, next_deadline) = {
            let mut state = shared.lock();
            if state.closed {
                break;
            }
            let now = Instant::now();
            let due: Vec<IdleHandle> = if std::mem::take(&mut state.idle) {
                state.pending.keys().copied().collect()
            } else {
                state
                    .pending
                    .iter()
                    .filter(|(_, req)| req.deadline.is_some_and(|d| d <= now))
                    .map(|(handle, _)| *handle)
                    .collect()
            };
            let ready: Vec<(IdleHandle, IdleCallback)> = due
                .into_iter()
                .filter_map(|h| state.pending.remove(&h).map(|req| (h, req.callback)))
                .collect();
            let next_deadline = state.pending.values().filter_map(|r| r.deadline).min();
            (ready, next_deadline)
        }; // Lock released here

        if !ready.is_empty() {
            for (handle, callback) in ready {
                trace!(handle = handle.value(), "running idle callback");
                callback().await;
            }
            continue;
        }

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = shared.wake.notified() => {},
                    _ = tokio::time::sleep_until(deadline) => {},
                }
            }
            None => shared.wake.notified().await,
        }
    }
    debug!("cooperative idle scheduler stopped");
}

/// "Run after N ms" fallback for hosts without idle detection.
///
/// With a timeout shorter than the delay, the timeout wins.
pub struct DelayIdleScheduler {
    delay: Duration,
    next_handle: AtomicU64,
    pending: Arc<Mutex<HashMap<IdleHandle, Option<AbortHandle>>>>,
}

impl DelayIdleScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_handle: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdleHandle, Option<AbortHandle>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdleScheduler for DelayIdleScheduler {
    fn run_when_idle(&self, callback: IdleCallback, timeout: Option<Duration>) -> IdleHandle {
        let handle = IdleHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let wait = timeout.map_or(self.delay, |t| t.min(self.delay));

        // spawn より先に登録しておく（wait=0 でも取りこぼさない）
        self.lock().insert(handle, None);

        let pending = Arc::clone(&self.pending);
        let join = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let still_pending = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&handle)
                .is_some();
            if still_pending {
                callback().await;
            }
        });

        if let Some(slot) = self.lock().get_mut(&handle) {
            *slot = Some(join.abort_handle());
        }
        handle
    }

    fn cancel_idle_request(&self, handle: IdleHandle) -> bool {
        match self.lock().remove(&handle) {
            Some(abort) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                true
            }
            None => false,
        }
    }

    fn shutdown(&self) {
        for (_, abort) in self.lock().drain() {
            if let Some(abort) = abort {
                abort.abort();
            }
        }
    }
}
