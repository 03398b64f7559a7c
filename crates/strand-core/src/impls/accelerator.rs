//! Accelerator の実装
//!
//! - **NoAccelerator**: 常に unavailable（Engine のデフォルト。全て Immediate にフォールバック）
//! - **KernelAccelerator**: 名前付きのネイティブ kernel を起動時に登録しておく

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Payload;
use crate::ports::{Accelerator, AcceleratorError, Callable};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

#[async_trait]
impl Accelerator for NoAccelerator {
    async fn prepare(
        &self,
        _payload: &Payload,
        _kernel: Option<&str>,
    ) -> Result<Arc<dyn Callable>, AcceleratorError> {
        Err(AcceleratorError::Unavailable(
            "no accelerator configured".to_string(),
        ))
    }
}

/// Registry of named accelerated kernels.
///
/// Built during initialization (mutable), used during runtime (immutable).
#[derive(Default)]
pub struct KernelAccelerator {
    kernels: HashMap<String, Arc<dyn Callable>>,
}

impl KernelAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel. Last registration wins.
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: Arc<dyn Callable>) -> Self {
        self.kernels.insert(name.into(), kernel);
        self
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[async_trait]
impl Accelerator for KernelAccelerator {
    async fn prepare(
        &self,
        _payload: &Payload,
        kernel: Option<&str>,
    ) -> Result<Arc<dyn Callable>, AcceleratorError> {
        let name = kernel
            .ok_or_else(|| AcceleratorError::Unavailable("no kernel requested".to_string()))?;
        self.kernels
            .get(name)
            .cloned()
            .ok_or_else(|| AcceleratorError::Unavailable(format!("kernel '{name}' not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskInput};
    use crate::ports::callable_fn;
    use serde_json::json;
    use ulid::Ulid;

    fn payload() -> Payload {
        Payload::new(callable_fn(|_| async { Ok(json!("slow")) }), json!({}))
    }

    #[tokio::test]
    async fn no_accelerator_is_always_unavailable() {
        let err = NoAccelerator.prepare(&payload(), Some("simd")).await.err();
        assert!(matches!(err, Some(AcceleratorError::Unavailable(_))));
    }

    #[tokio::test]
    async fn kernel_accelerator_resolves_registered_kernel() {
        let acc = KernelAccelerator::new()
            .with_kernel("simd", callable_fn(|_| async { Ok(json!("fast")) }));
        assert_eq!(acc.len(), 1);

        let kernel = acc.prepare(&payload(), Some("simd")).await.unwrap();
        let input = TaskInput {
            task_id: TaskId::from_ulid(Ulid::new()),
            args: json!({}),
            chunk: None,
        };
        assert_eq!(kernel.call(input).await, Ok(json!("fast")));
    }

    #[tokio::test]
    async fn kernel_accelerator_rejects_unknown_or_missing_kernel() {
        let acc = KernelAccelerator::new();
        let unknown = acc.prepare(&payload(), Some("gpu")).await.err();
        assert_eq!(
            unknown,
            Some(AcceleratorError::Unavailable("kernel 'gpu' not registered".to_string()))
        );
        assert!(acc.prepare(&payload(), None).await.is_err());
    }
}
