//! EngineBuilder - Engine の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンで ports を差し替える（テストでは FixedClock や
//!   CooperativeIdleScheduler を注入する）
//! - 起動時検証（Fail-fast 設計）: tokio ランタイムの外では作らせない

use std::sync::Arc;

use super::Engine;
use crate::config::EngineConfig;
use crate::impls::{DelayIdleScheduler, NoAccelerator};
use crate::ports::{Accelerator, Clock, IdGenerator, IdleScheduler, SystemClock, UlidGenerator};

/// EngineBuilder は Engine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .config(EngineConfig::default().with_max_workers(2))
///     .accelerator(Arc::new(KernelAccelerator::new().with_kernel("sum", sum)))
///     .build()?;
/// ```
///
/// 指定しなかった port は既定の実装になる:
/// - IdleScheduler: `DelayIdleScheduler`（`idle_fallback_delay_ms`）
/// - Accelerator: `NoAccelerator`（常に Immediate にフォールバック）
/// - Clock: `SystemClock`
/// - IdGenerator: `UlidGenerator`（同じ Clock を使う）
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    idle: Option<Arc<dyn IdleScheduler>>,
    accelerator: Option<Arc<dyn Accelerator>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は Engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Engine must be built inside a tokio runtime (workers are tokio tasks).")]
    NoRuntime,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn idle_scheduler(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        self.idle = Some(idle);
        self
    }

    pub fn accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Engine を構築してワーカーを起動する
    ///
    /// # 検証
    /// - tokio ランタイムの中で呼ばれているか（外なら BuildError::NoRuntime）
    pub fn build(self) -> Result<Engine, BuildError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let idle = self
            .idle
            .unwrap_or_else(|| Arc::new(DelayIdleScheduler::new(self.config.idle_fallback_delay())));
        let accelerator = self.accelerator.unwrap_or_else(|| Arc::new(NoAccelerator));

        Ok(Engine::start(self.config, clock, ids, idle, accelerator))
    }
}
