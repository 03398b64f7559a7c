//! Callable port - Engine が実行する「中身の見えない仕事」
//!
//! ソース文字列を受け取って評価することはしない。
//! 呼び出し側は trait object（またはクロージャ）を登録する。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::TaskInput;

/// Error reported by a callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Structured failure of the work itself. Recorded as `TaskExecution`.
    #[error("{0}")]
    Failed(String),

    /// Unstructured failure: the worker is considered dead and gets replaced.
    #[error("worker fault: {0}")]
    Fault(String),
}

impl CallError {
    pub fn failed(message: impl Into<String>) -> Self {
        CallError::Failed(message.into())
    }

    pub fn fault(message: impl Into<String>) -> Self {
        CallError::Fault(message.into())
    }
}

/// A unit of work the engine can run without knowing what it computes.
///
/// # Example
/// ```ignore
/// struct Resize;
///
/// #[async_trait]
/// impl Callable for Resize {
///     async fn call(&self, input: TaskInput) -> Result<Value, CallError> {
///         let width = input.args["width"].as_u64().ok_or_else(|| CallError::failed("width"))?;
///         Ok(json!({ "width": width / 2 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, input: TaskInput) -> Result<Value, CallError>;
}

/// Adapter that turns an async closure into a `Callable`.
pub struct FnCallable<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Callable for FnCallable<F>
where
    F: Fn(TaskInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
{
    async fn call(&self, input: TaskInput) -> Result<Value, CallError> {
        (self.f)(input).await
    }
}

/// Wrap an async closure as a shareable callable.
pub fn callable_fn<F, Fut>(f: F) -> Arc<dyn Callable>
where
    F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
{
    Arc::new(FnCallable { f })
}
