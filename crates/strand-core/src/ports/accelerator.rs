//! Accelerator port - 高速化された実行コンテキストの準備
//!
//! 準備に失敗したら Engine は黙って Immediate 経路にフォールバックする。
//! 失敗は呼び出し側には見せず、stats の `accelerated_fallbacks` にだけ現れる。

use std::sync::Arc;

use async_trait::async_trait;

use super::Callable;
use crate::domain::Payload;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcceleratorError {
    #[error("accelerated path unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Accelerator: Send + Sync {
    /// Build the accelerated callable for `payload`, optionally selecting `kernel`.
    async fn prepare(
        &self,
        payload: &Payload,
        kernel: Option<&str>,
    ) -> Result<Arc<dyn Callable>, AcceleratorError>;
}
