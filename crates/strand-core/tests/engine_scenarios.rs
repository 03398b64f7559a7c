use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use strand_core::impls::{CooperativeIdleScheduler, KernelAccelerator};
use strand_core::{
    CallError, Callable, Engine, EngineConfig, EngineError, ErrorKind, Priority, TaskEvent,
    TaskId, TaskInput, TaskOptions, TaskState, callable_fn,
};
use tokio::sync::{Semaphore, broadcast};
use tokio::time::{Instant, sleep, timeout};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn engine(workers: usize) -> Engine {
    Engine::initialize(EngineConfig::default().with_max_workers(workers)).unwrap()
}

fn started(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

/// Logs `name` when it starts, then returns it.
fn logged(log: &Log, name: &'static str) -> Arc<dyn Callable> {
    let log = Arc::clone(log);
    callable_fn(move |_| {
        log.lock().unwrap().push(name);
        async move { Ok(json!(name)) }
    })
}

/// Logs `name` when it starts, then blocks until the gate opens.
fn gated(log: &Log, name: &'static str) -> (Arc<dyn Callable>, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let log = Arc::clone(log);
    let g = Arc::clone(&gate);
    let callable = callable_fn(move |_| {
        log.lock().unwrap().push(name);
        let gate = Arc::clone(&g);
        async move {
            match gate.acquire().await {
                Ok(_permit) => Ok(json!(name)),
                Err(closed) => Err(CallError::failed(closed.to_string())),
            }
        }
    });
    (callable, gate)
}

async fn finished(events: &mut broadcast::Receiver<TaskEvent>, id: TaskId) -> TaskEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event @ TaskEvent::Finished { .. }) if event.task_id() == id => return event,
                Ok(_) => continue,
                Err(err) => panic!("event stream broke: {err}"),
            }
        }
    })
    .await
    .expect("task finished in time")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let give_up = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < give_up, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn two_workers_dispatch_by_priority_and_queue_the_rest() {
    let engine = engine(2);
    let mut events = engine.subscribe();
    let log: Log = Arc::default();

    let (medium, medium_gate) = gated(&log, "medium");
    let (critical, critical_gate) = gated(&log, "critical");
    let m = engine
        .submit_task(medium, TaskOptions::pooled().with_priority(Priority::Medium).retained())
        .await
        .unwrap();
    let c = engine
        .submit_task(critical, TaskOptions::pooled().with_priority(Priority::Critical).retained())
        .await
        .unwrap();
    let l = engine
        .submit_task(
            logged(&log, "low"),
            TaskOptions::pooled().with_priority(Priority::Low).retained(),
        )
        .await
        .unwrap();

    assert_eq!(engine.task_status(m).unwrap().state, TaskState::Running);
    assert_eq!(engine.task_status(c).unwrap().state, TaskState::Running);
    assert_eq!(engine.task_status(l).unwrap().state, TaskState::Queued);
    let stats = engine.stats();
    assert_eq!(stats.workers_active, 2);
    assert_eq!(stats.workers_available, 0);
    assert_eq!(stats.utilization_percent, 100.0);
    assert_eq!(stats.queued, 1);

    critical_gate.add_permits(1);
    finished(&mut events, c).await;
    finished(&mut events, l).await;
    assert_eq!(started(&log).last(), Some(&"low"));
    assert_eq!(engine.task_status(m).unwrap().state, TaskState::Running);

    medium_gate.add_permits(1);
    finished(&mut events, m).await;
    let low = engine.task_status(l).unwrap();
    assert_eq!(low.result, Some(json!("low")));
    assert!(low.queued_at.is_some());
}

#[tokio::test]
async fn freed_worker_runs_critical_before_low() {
    let engine = engine(1);
    let mut events = engine.subscribe();
    let log: Log = Arc::default();

    let (blocker, gate) = gated(&log, "blocker");
    engine.submit_task(blocker, TaskOptions::pooled()).await.unwrap();
    engine
        .submit_task(logged(&log, "a-low"), TaskOptions::pooled().with_priority(Priority::Low))
        .await
        .unwrap();
    let b = engine
        .submit_task(
            logged(&log, "b-critical"),
            TaskOptions::pooled().with_priority(Priority::Critical),
        )
        .await
        .unwrap();
    assert_eq!(engine.stats().queued, 2);

    gate.add_permits(1);
    finished(&mut events, b).await;
    eventually(|| started(&log).len() == 3).await;
    assert_eq!(started(&log), vec!["blocker", "b-critical", "a-low"]);
}

#[tokio::test]
async fn background_waits_while_higher_priority_work_is_queued() {
    let engine = engine(1);
    let log: Log = Arc::default();

    let (blocker, gate) = gated(&log, "blocker");
    engine.submit_task(blocker, TaskOptions::pooled()).await.unwrap();
    engine
        .submit_task(
            logged(&log, "background"),
            TaskOptions::pooled().with_priority(Priority::Background),
        )
        .await
        .unwrap();
    for name in ["high-1", "high-2", "high-3"] {
        engine
            .submit_task(logged(&log, name), TaskOptions::pooled().with_priority(Priority::High))
            .await
            .unwrap();
    }

    gate.add_permits(1);
    eventually(|| started(&log).len() == 5).await;
    assert_eq!(
        started(&log),
        vec!["blocker", "high-1", "high-2", "high-3", "background"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunk_results_follow_chunk_order() {
    let engine = engine(4);
    let mut events = engine.subscribe();

    // later chunks finish first
    let callable = callable_fn(|input: TaskInput| async move {
        let Some(chunk) = input.chunk else {
            return Err(CallError::failed("missing chunk"));
        };
        let delay = (chunk.total - chunk.index) as u64 * 15;
        sleep(Duration::from_millis(delay)).await;
        Ok(json!(format!("r{}", chunk.index)))
    });
    let id = engine
        .submit_task(callable, TaskOptions::chunked(4).retained())
        .await
        .unwrap();
    assert_eq!(engine.task_status(id).unwrap().state, TaskState::Chunked);

    let mut progress = Vec::new();
    let finished = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                TaskEvent::Progress {
                    task_id, completed, ..
                } if task_id == id => progress.push(completed),
                event @ TaskEvent::Finished { .. } if event.task_id() == id => return event,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(progress, vec![1, 2, 3, 4]);
    match finished {
        TaskEvent::Finished { state, result, .. } => {
            assert_eq!(state, TaskState::Completed);
            assert_eq!(result, Some(json!(["r0", "r1", "r2", "r3"])));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let status = engine.task_status(id).unwrap();
    assert_eq!(status.progress, 100.0);
    assert_eq!(status.result, Some(json!(["r0", "r1", "r2", "r3"])));
}

#[tokio::test]
async fn failing_chunk_fails_parent_without_result() {
    let engine = engine(3);
    let mut events = engine.subscribe();

    let callable = callable_fn(|input: TaskInput| async move {
        match input.chunk.map(|c| c.index) {
            Some(1) => Err(CallError::failed("row 1 is corrupt")),
            Some(index) => {
                sleep(Duration::from_millis(20)).await;
                Ok(json!(index))
            }
            None => Err(CallError::failed("missing chunk")),
        }
    });
    let id = engine
        .submit_task(callable, TaskOptions::chunked(3).retained())
        .await
        .unwrap();
    finished(&mut events, id).await;

    let status = engine.task_status(id).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert!(status.result.is_none());
    let err = status.error.unwrap();
    assert_eq!(err.kind, ErrorKind::ChunkFailure);
    assert_eq!(err.chunk_index, Some(1));
    assert!(err.message.contains("row 1 is corrupt"));

    // siblings that were still running finish quietly; the parent never changes again
    eventually(|| engine.stats().workers_active == 0).await;
    let status = engine.task_status(id).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert!(status.result.is_none());
}

#[tokio::test]
async fn canceled_queued_task_is_never_dispatched() {
    let engine = engine(1);
    let mut events = engine.subscribe();
    let log: Log = Arc::default();

    let (blocker, gate) = gated(&log, "blocker");
    let b = engine.submit_task(blocker, TaskOptions::pooled()).await.unwrap();
    let t = engine
        .submit_task(logged(&log, "victim"), TaskOptions::pooled().retained())
        .await
        .unwrap();
    assert_eq!(engine.task_status(t).unwrap().state, TaskState::Queued);

    assert!(engine.cancel_task(t).unwrap());
    assert_eq!(engine.task_status(t).unwrap().state, TaskState::Canceled);
    assert_eq!(engine.stats().queued, 0);
    assert!(!engine.cancel_task(t).unwrap());

    gate.add_permits(1);
    finished(&mut events, b).await;
    eventually(|| engine.stats().workers_active == 0).await;
    assert_eq!(started(&log), vec!["blocker"]);
    assert_eq!(engine.task_status(t).unwrap().state, TaskState::Canceled);
}

#[tokio::test]
async fn canceled_running_task_discards_its_result() {
    let engine = engine(1);
    let log: Log = Arc::default();

    let (slow, gate) = gated(&log, "slow");
    let id = engine
        .submit_task(slow, TaskOptions::pooled().retained())
        .await
        .unwrap();
    assert!(engine.cancel_task(id).unwrap());

    gate.add_permits(1);
    eventually(|| engine.stats().workers_active == 0).await;
    let status = engine.task_status(id).unwrap();
    assert_eq!(status.state, TaskState::Canceled);
    assert!(status.result.is_none());
    assert!(status.worker.is_none());
}

#[tokio::test]
async fn canceling_chunked_parent_cancels_outstanding_chunks() {
    let engine = engine(1);
    let mut events = engine.subscribe();
    let log: Log = Arc::default();

    let (chunk, gate) = gated(&log, "chunk");
    let id = engine
        .submit_task(chunk, TaskOptions::chunked(4).retained())
        .await
        .unwrap();
    assert_eq!(engine.task_status(id).unwrap().state, TaskState::Chunked);
    assert_eq!(engine.stats().queued, 3);

    assert!(engine.cancel_task(id).unwrap());
    assert_eq!(engine.task_status(id).unwrap().state, TaskState::Canceled);
    assert_eq!(engine.stats().queued, 0);

    gate.add_permits(4);
    eventually(|| engine.stats().workers_active == 0).await;
    sleep(Duration::from_millis(30)).await;

    assert_eq!(started(&log), vec!["chunk"]);
    let stats = engine.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.total_tasks, 1);
    let status = engine.task_status(id).unwrap();
    assert_eq!(status.state, TaskState::Canceled);
    assert!(status.result.is_none());

    let mut finished_states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TaskEvent::Finished { task_id, state, .. } = event {
            if task_id == id {
                finished_states.push(state);
            }
        }
    }
    assert_eq!(finished_states, vec![TaskState::Canceled]);
}

struct Crashes;

#[async_trait]
impl Callable for Crashes {
    async fn call(&self, _input: TaskInput) -> Result<Value, CallError> {
        panic!("worker crashed")
    }
}

#[tokio::test]
async fn worker_fault_keeps_pool_size() {
    let engine = engine(2);
    let mut events = engine.subscribe();

    let id = engine
        .submit_task(Arc::new(Crashes), TaskOptions::pooled().retained())
        .await
        .unwrap();
    finished(&mut events, id).await;
    let status = engine.task_status(id).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.error.unwrap().kind, ErrorKind::WorkerFault);

    let fault = engine
        .submit_task(
            callable_fn(|_| async { Err(CallError::fault("bad response")) }),
            TaskOptions::pooled().retained(),
        )
        .await
        .unwrap();
    finished(&mut events, fault).await;
    assert_eq!(
        engine.task_status(fault).unwrap().error.unwrap().kind,
        ErrorKind::WorkerFault
    );

    let stats = engine.stats();
    assert_eq!(stats.workers_total, 2);
    assert_eq!(stats.worker_faults, 2);

    // both replacements take work
    let mut ids = Vec::new();
    for n in 0..4 {
        let id = engine
            .submit_task(
                callable_fn(move |_| async move { Ok(json!(n)) }),
                TaskOptions::pooled().retained(),
            )
            .await
            .unwrap();
        ids.push(id);
    }
    for id in ids {
        finished(&mut events, id).await;
        assert_eq!(engine.task_status(id).unwrap().state, TaskState::Completed);
    }
    assert_eq!(engine.stats().workers_total, 2);
}

#[tokio::test]
async fn deferred_runs_at_timeout_on_a_host_that_never_idles() {
    let idle = Arc::new(CooperativeIdleScheduler::new());
    let engine = Engine::builder()
        .config(EngineConfig::default().with_max_workers(1))
        .idle_scheduler(idle.clone())
        .build()
        .unwrap();
    let mut events = engine.subscribe();

    let submitted = Instant::now();
    let id = engine
        .submit_task(
            callable_fn(|_| async { Ok(json!("late")) }),
            TaskOptions::deferred().with_timeout_ms(50).retained(),
        )
        .await
        .unwrap();
    assert_eq!(engine.task_status(id).unwrap().state, TaskState::Scheduled);
    assert_eq!(idle.pending(), 1);

    finished(&mut events, id).await;
    let elapsed = submitted.elapsed();
    assert!(elapsed >= Duration::from_millis(45), "ran too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "ran too late: {elapsed:?}");
    assert_eq!(engine.task_status(id).unwrap().result, Some(json!("late")));
}

#[tokio::test]
async fn deferred_runs_on_idle_and_cancel_revokes() {
    let idle = Arc::new(CooperativeIdleScheduler::new());
    let engine = Engine::builder()
        .idle_scheduler(idle.clone())
        .build()
        .unwrap();
    let mut events = engine.subscribe();

    let revoked = engine
        .submit_task(
            callable_fn(|_| async { Ok(json!("never")) }),
            TaskOptions::deferred().retained(),
        )
        .await
        .unwrap();
    assert!(engine.cancel_task(revoked).unwrap());
    assert_eq!(idle.pending(), 0);

    let id = engine
        .submit_task(
            callable_fn(|_| async { Ok(json!("idle")) }),
            TaskOptions::deferred().retained(),
        )
        .await
        .unwrap();
    idle.report_idle();
    finished(&mut events, id).await;
    assert_eq!(engine.task_status(id).unwrap().state, TaskState::Completed);
    assert_eq!(engine.task_status(revoked).unwrap().state, TaskState::Canceled);
}

#[tokio::test]
async fn accelerated_uses_kernel_or_falls_back_silently() {
    let kernel = callable_fn(|_| async { Ok(json!("fast")) });
    let engine = Engine::builder()
        .config(EngineConfig::default().with_max_workers(1))
        .accelerator(Arc::new(KernelAccelerator::new().with_kernel("sum", kernel)))
        .build()
        .unwrap();
    let plain = callable_fn(|_| async { Ok(json!("plain")) });

    let fast = engine
        .submit_task(
            plain.clone(),
            TaskOptions::accelerated().with_kernel("sum").retained(),
        )
        .await
        .unwrap();
    assert_eq!(engine.task_status(fast).unwrap().result, Some(json!("fast")));

    let slow = engine
        .submit_task(
            plain,
            TaskOptions::accelerated().with_kernel("missing").retained(),
        )
        .await
        .unwrap();
    let status = engine.task_status(slow).unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.result, Some(json!("plain")));
    assert_eq!(engine.stats().accelerated_fallbacks, 1);
}

#[tokio::test]
async fn pooled_deadline_fails_with_timeout() {
    let engine = engine(1);
    let mut events = engine.subscribe();
    let id = engine
        .submit_task(
            callable_fn(|_| async {
                sleep(Duration::from_secs(10)).await;
                Ok(json!(null))
            }),
            TaskOptions::pooled().with_deadline_ms(20).retained(),
        )
        .await
        .unwrap();
    finished(&mut events, id).await;
    assert_eq!(
        engine.task_status(id).unwrap().error.unwrap().kind,
        ErrorKind::Timeout
    );
    assert_eq!(engine.stats().worker_faults, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cancel_and_completion_finish_each_task_once() {
    let engine = engine(3);
    let mut events = engine.subscribe();

    let mut ids = Vec::new();
    for n in 0..30 {
        let id = engine
            .submit_task(
                callable_fn(move |_| async move { Ok(json!(n)) }),
                TaskOptions::pooled().retained(),
            )
            .await
            .unwrap();
        if n % 2 == 0 {
            let _ = engine.cancel_task(id).unwrap();
        }
        ids.push(id);
    }

    let mut seen: HashMap<TaskId, usize> = HashMap::new();
    timeout(Duration::from_secs(5), async {
        while seen.len() < ids.len() {
            if let TaskEvent::Finished { task_id, .. } = events.recv().await.unwrap() {
                *seen.entry(task_id).or_default() += 1;
            }
        }
    })
    .await
    .unwrap();
    // a late duplicate would show up right behind the first one
    sleep(Duration::from_millis(50)).await;
    while let Ok(event) = events.try_recv() {
        if let TaskEvent::Finished { task_id, .. } = event {
            *seen.entry(task_id).or_default() += 1;
        }
    }

    for id in &ids {
        assert_eq!(seen.get(id), Some(&1), "{id} finished more than once");
        let status = engine.task_status(*id).unwrap();
        assert!(status.is_terminal());
        assert_eq!(status.result.is_some(), status.state == TaskState::Completed);
    }
}

#[tokio::test]
async fn shutdown_cancels_and_forgets_everything() {
    let engine = engine(1);
    let log: Log = Arc::default();

    let (blocker, _gate) = gated(&log, "blocker");
    let running = engine
        .submit_task(blocker, TaskOptions::pooled().retained())
        .await
        .unwrap();
    engine
        .submit_task(logged(&log, "queued"), TaskOptions::pooled().retained())
        .await
        .unwrap();
    assert_eq!(engine.stats().total_tasks, 2);

    engine.shutdown();
    let stats = engine.stats();
    assert_eq!(stats.total_tasks, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.workers_total, 1);
    assert!(matches!(
        engine.task_status(running),
        Err(EngineError::TaskNotFound(_))
    ));
    assert!(matches!(
        engine
            .submit_task(logged(&log, "late"), TaskOptions::immediate())
            .await,
        Err(EngineError::ShutDown)
    ));
    assert_eq!(started(&log), vec!["blocker"]);
}
