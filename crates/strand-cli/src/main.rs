use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, sleep};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strand_core::impls::KernelAccelerator;
use strand_core::{
    CallError, Callable, Engine, EngineConfig, Priority, TaskEvent, TaskInput, TaskOptions,
    callable_fn,
};

#[derive(Debug, Deserialize)]
struct HelloArgs {
    name: String,
}

/// 最初の `n` 回はわざと失敗する callable
struct HelloCallable {
    remaining_failures: AtomicU32,
}

impl HelloCallable {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Callable for HelloCallable {
    async fn call(&self, input: TaskInput) -> Result<Value, CallError> {
        let args: HelloArgs = serde_json::from_value(input.args)
            .map_err(|e| CallError::failed(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(CallError::failed(format!("intentional failure (left={left})")));
        }

        sleep(Duration::from_millis(20)).await;
        Ok(json!(format!("Hello, {}!", args.name)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand_core=info,strand_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // (A) 環境変数から設定を読み、Engine を起動
    let sum = callable_fn(|input: TaskInput| async move {
        let total: i64 = input
            .args
            .as_array()
            .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
            .unwrap_or_default();
        Ok(json!(total))
    });
    let engine = Engine::builder()
        .config(EngineConfig::from_env())
        .accelerator(Arc::new(KernelAccelerator::new().with_kernel("sum", sum)))
        .build()?;
    let report = engine.report();
    tracing::info!(workers = report.worker_count, status = %report.status, "strand-cli starting...");

    let mut events = engine.subscribe();
    let hello: Arc<dyn Callable> = Arc::new(HelloCallable::new(1));

    // (B) 戦略ごとに 1 件ずつ投入
    let immediate = engine
        .submit_task(
            hello.clone(),
            TaskOptions::immediate()
                .with_args(json!({ "name": "immediate" }))
                .retained(),
        )
        .await?;
    println!("immediate: {}", serde_json::to_string(&engine.task_status(immediate)?)?);

    let mut pending = Vec::new();
    for (name, priority) in [
        ("pooled-low", Priority::Low),
        ("pooled-critical", Priority::Critical),
        ("pooled-medium", Priority::Medium),
    ] {
        let id = engine
            .submit_task(
                hello.clone(),
                TaskOptions::pooled()
                    .with_priority(priority)
                    .with_args(json!({ "name": name })),
            )
            .await?;
        pending.push(id);
    }

    pending.push(
        engine
            .submit_task(
                hello.clone(),
                TaskOptions::deferred()
                    .with_timeout_ms(100)
                    .with_args(json!({ "name": "deferred" })),
            )
            .await?,
    );

    let square = callable_fn(|input: TaskInput| async move {
        let index = input.chunk.map(|c| c.index).unwrap_or_default() as u64;
        Ok(json!(index * index))
    });
    pending.push(engine.submit_task(square, TaskOptions::chunked(4)).await?);

    let accelerated = engine
        .submit_task(
            callable_fn(|_| async { Ok(json!("slow path")) }),
            TaskOptions::accelerated()
                .with_kernel("sum")
                .with_args(json!([1, 2, 3]))
                .retained(),
        )
        .await?;
    println!("accelerated: {}", serde_json::to_string(&engine.task_status(accelerated)?)?);

    // (C) 完了イベントを待つ
    while !pending.is_empty() {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event @ TaskEvent::Finished { .. })) => {
                println!("event: {}", serde_json::to_string(&event)?);
                pending.retain(|id| *id != event.task_id());
            }
            Ok(Ok(event)) => println!("event: {}", serde_json::to_string(&event)?),
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "event stream lagged");
            }
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {
                tracing::warn!(remaining = pending.len(), "gave up waiting for tasks");
                break;
            }
        }
    }

    // (D) 統計を出して止める
    println!("stats: {}", serde_json::to_string_pretty(&engine.stats())?);
    let shutdown = engine.shutdown();
    println!("shutdown: {}", serde_json::to_string(&shutdown)?);
    Ok(())
}
