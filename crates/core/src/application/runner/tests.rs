use super::*;
use crate::application::bus::BusConfig;
use crate::application::store::{keys, StoreConfig};
use crate::domain::StageDescriptor;
use crate::port::durable_store::mocks::MemoryStore;
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::stage_executor::mocks::ScriptedStageExecutor;
use crate::port::time_provider::mocks::FixedTimeProvider;
use crate::port::FnStageExecutor;
use std::sync::Mutex as StdMutex;

struct Harness {
    runner: Arc<JobRunner>,
    bus: Arc<JobBus>,
    store: Arc<JobStore>,
    backing: Arc<MemoryStore>,
    registry: Arc<StageRegistry>,
}

fn bookmark_plan() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new("collect", "Collecting bookmarks", 20),
        StageDescriptor::new("tag", "Tagging bookmarks", 50),
        StageDescriptor::new("organize", "Organizing folders", 30),
    ]
}

fn harness(config: RunnerConfig) -> Harness {
    let backing = Arc::new(MemoryStore::new());
    let time: Arc<dyn TimeProvider> = Arc::new(FixedTimeProvider::new(1_000_000));
    let store = Arc::new(JobStore::new(
        backing.clone(),
        Arc::clone(&time),
        StoreConfig::default(),
    ));
    let bus = Arc::new(JobBus::new(
        Arc::clone(&store),
        Arc::clone(&time),
        BusConfig::default(),
    ));
    let registry = Arc::new(StageRegistry::new());
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&registry),
        time,
        Arc::new(SequentialIdProvider::new()),
        config,
    ));
    Harness {
        runner,
        bus,
        store,
        backing,
        registry,
    }
}

/// Poll until the in-memory snapshot reaches the wanted status. Relies on
/// paused-clock auto-advance to drive spawned run loops forward.
async fn wait_for_status(runner: &Arc<JobRunner>, status: JobStatus) -> JobSnapshot {
    for _ in 0..500 {
        if let Some(snap) = runner.current_snapshot().await {
            if snap.status == status {
                return snap;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job never reached {}", status);
}

#[tokio::test(start_paused = true)]
async fn full_lifecycle_walks_weighted_percent() {
    let h = harness(RunnerConfig::new(bookmark_plan()));
    h.registry
        .register("collect", Arc::new(ScriptedStageExecutor::completing(8, 8)));
    h.registry.register(
        "tag",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            ctx.hooks.progress(25, Some(50)).await;
            Ok(StageOutcome::completed().units(50, 50))
        })),
    );
    h.registry.register(
        "organize",
        Arc::new(ScriptedStageExecutor::completing(3, 3)),
    );

    let percents: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&percents);
    h.bus.subscribe("probe", move |event| {
        if let JobEvent::Status { job } | JobEvent::StageProgress { job, .. } = event {
            sink.lock().unwrap().push(job.weighted_percent);
        }
    });

    let response = h.runner.start("tester", None).await;
    assert!(response.success);
    assert_eq!(response.job_id.as_deref(), Some("job-1"));

    let snap = wait_for_status(&h.runner, JobStatus::Completed).await;
    assert_eq!(snap.weighted_percent, 100);
    assert!(!snap.indeterminate);
    assert!(snap.completed_at.is_some());
    assert!(snap.summary.contains_key("runtimeMs"));

    // Full credit after each stage plus the mid-tag observation
    let seen = percents.lock().unwrap().clone();
    assert!(seen.contains(&20), "collect credit missing: {:?}", seen);
    assert!(seen.contains(&45), "mid-tag percent missing: {:?}", seen);
    assert!(seen.contains(&70), "tag credit missing: {:?}", seen);
    assert_eq!(*seen.last().unwrap(), 100);

    // Terminal snapshot archived, active slot cleared
    let history = h.store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot.status, JobStatus::Completed);
    assert!(h.backing.peek(keys::SNAPSHOT).is_none());
}

#[tokio::test(start_paused = true)]
async fn start_rejects_while_a_job_is_active() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    h.registry.register(
        "collect",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            let mut cancel = ctx.cancel.clone();
            cancel.cancelled().await;
            Ok(StageOutcome::default())
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    wait_for_status(&h.runner, JobStatus::Running).await;

    let second = h.runner.start("tester", None).await;
    assert!(!second.success);
    assert!(second.error.unwrap().contains("already running"));
}

#[tokio::test(start_paused = true)]
async fn pause_without_a_job_fails_cleanly() {
    let h = harness(RunnerConfig::new(bookmark_plan()));

    let events: Arc<StdMutex<usize>> = Arc::new(StdMutex::new(0));
    let sink = Arc::clone(&events);
    h.bus.subscribe("probe", move |_| {
        *sink.lock().unwrap() += 1;
    });

    let response = h.runner.pause().await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("No active job"));
    assert_eq!(*events.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_preserve_stage_progress() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "tag", "Tagging", 100,
    )]));
    h.registry.register(
        "tag",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            if ctx.processed_units == 0 {
                ctx.hooks.progress(5, Some(10)).await;
                let mut cancel = ctx.cancel.clone();
                cancel.cancelled().await;
                return Ok(StageOutcome::default());
            }
            Ok(StageOutcome::completed().units(10, 10))
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    for _ in 0..500 {
        if h.runner
            .current_snapshot()
            .await
            .is_some_and(|s| s.stage_units.processed == 5)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(h.runner.pause().await.success);
    let paused = wait_for_status(&h.runner, JobStatus::Paused).await;
    assert_eq!(paused.stage_units.processed, 5);
    assert_eq!(paused.job_id, "job-1");

    // Pause is flushed immediately, never left pending
    let persisted = h.backing.peek(keys::SNAPSHOT).unwrap();
    assert_eq!(persisted["status"], "paused");

    assert!(h.runner.resume().await.success);
    let done = wait_for_status(&h.runner, JobStatus::Completed).await;
    assert_eq!(done.job_id, "job-1");
    assert_eq!(done.stage_units.processed, 10);
}

#[tokio::test(start_paused = true)]
async fn restart_rehydrates_paused_job_from_store() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "tag", "Tagging", 100,
    )]));
    h.registry.register(
        "tag",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            if ctx.processed_units == 0 {
                ctx.hooks.progress(5, Some(10)).await;
                let mut cancel = ctx.cancel.clone();
                cancel.cancelled().await;
                return Ok(StageOutcome::default());
            }
            Ok(StageOutcome::completed().units(10, 10))
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    for _ in 0..500 {
        if h.runner
            .current_snapshot()
            .await
            .is_some_and(|s| s.stage_units.processed == 5)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.runner.pause().await.success);
    wait_for_status(&h.runner, JobStatus::Paused).await;

    // Fresh runner over the same store simulates a process restart
    let reborn = Arc::new(JobRunner::new(
        Arc::clone(&h.store),
        Arc::clone(&h.bus),
        Arc::clone(&h.registry),
        Arc::new(FixedTimeProvider::new(2_000_000)),
        Arc::new(SequentialIdProvider::new()),
        RunnerConfig::new(vec![StageDescriptor::new("tag", "Tagging", 100)]),
    ));
    let response = reborn.start("tester", None).await;
    assert!(response.success);
    assert_eq!(response.job_id.as_deref(), Some("job-1"));

    let done = wait_for_status(&reborn, JobStatus::Completed).await;
    assert_eq!(done.job_id, "job-1");
    assert_eq!(done.stage_units.processed, 10);
}

#[tokio::test(start_paused = true)]
async fn cancel_running_job_finalizes_as_cancelled() {
    let h = harness(RunnerConfig::new(bookmark_plan()));
    h.registry.register(
        "collect",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            let mut cancel = ctx.cancel.clone();
            cancel.cancelled().await;
            Ok(StageOutcome::default())
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    wait_for_status(&h.runner, JobStatus::Running).await;
    assert!(h.runner.cancel().await.success);

    let snap = wait_for_status(&h.runner, JobStatus::Cancelled).await;
    assert_ne!(snap.weighted_percent, 100);
    assert!(snap.completed_at.is_none());

    let history = h.store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot.status, JobStatus::Cancelled);
    assert!(h.backing.peek(keys::SNAPSHOT).is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_paused_job_finalizes_without_a_run_loop() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    h.registry.register(
        "collect",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            let mut cancel = ctx.cancel.clone();
            cancel.cancelled().await;
            Ok(StageOutcome::default())
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    wait_for_status(&h.runner, JobStatus::Running).await;
    assert!(h.runner.pause().await.success);
    wait_for_status(&h.runner, JobStatus::Paused).await;

    // No stage in flight, so cancel finalizes inline
    assert!(h.runner.cancel().await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Cancelled).await;
    assert_eq!(snap.status, JobStatus::Cancelled);
    assert!(h.backing.peek(keys::SNAPSHOT).is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_pausing_an_inflight_stage_finalizes() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    h.registry.register(
        "collect",
        Arc::new(FnStageExecutor::new(|ctx: StageContext| async move {
            ctx.hooks.progress(3, Some(10)).await;
            let mut cancel = ctx.cancel.clone();
            cancel.cancelled().await;
            Ok(StageOutcome::default())
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    for _ in 0..500 {
        if h.runner
            .current_snapshot()
            .await
            .is_some_and(|s| s.stage_units.processed == 3)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Pause lands while the stage is still in flight; the superseded run
    // loop must not leave the slot looking busy
    assert!(h.runner.pause().await.success);
    wait_for_status(&h.runner, JobStatus::Paused).await;

    assert!(h.runner.cancel().await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Cancelled).await;
    assert_eq!(snap.stage_units.processed, 3);
    assert!(h.backing.peek(keys::SNAPSHOT).is_none());

    // And the slot is free for the next start
    assert!(h.runner.start("tester", None).await.success);
}

#[tokio::test(start_paused = true)]
async fn retryable_stage_recovers_after_transient_failures() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    let exec = Arc::new(ScriptedStageExecutor::new(vec![
        Err(StageError::Failed("network flake".to_string())),
        Err(StageError::Failed("network flake".to_string())),
        Ok(StageOutcome::completed().units(4, 4)),
    ]));
    h.registry.register("collect", exec.clone());

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Completed).await;
    assert_eq!(exec.execute_count(), 3);
    assert_eq!(snap.weighted_percent, 100);
    assert!(snap.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_pauses_with_the_error() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    let exec = Arc::new(ScriptedStageExecutor::always_failing("disk full"));
    h.registry.register("collect", exec.clone());

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Paused).await;

    // Initial attempt plus three retries
    assert_eq!(exec.execute_count(), 4);
    assert!(snap.error.unwrap().contains("disk full"));

    // Pause is resumable, not terminal
    assert!(h.backing.peek(keys::SNAPSHOT).is_some());
    assert!(h.store.history().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_retryable_stage_pauses_on_first_failure() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "organize", "Organizing", 100,
    )
    .retryable(false)]));
    let exec = Arc::new(ScriptedStageExecutor::always_failing("corrupt folder"));
    h.registry.register("organize", exec.clone());

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Paused).await;
    assert_eq!(exec.execute_count(), 1);
    assert!(snap.error.unwrap().contains("corrupt folder"));
}

#[tokio::test(start_paused = true)]
async fn fail_on_error_config_finalizes_as_failed() {
    let h = harness(
        RunnerConfig::new(vec![
            StageDescriptor::new("organize", "Organizing", 100).retryable(false)
        ])
        .fail_on_error(),
    );
    h.registry.register(
        "organize",
        Arc::new(ScriptedStageExecutor::always_failing("corrupt folder")),
    );

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Failed).await;
    assert!(snap.error.unwrap().contains("corrupt folder"));

    let history = h.store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot.status, JobStatus::Failed);
    assert!(h.backing.peek(keys::SNAPSHOT).is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_executor_pauses_the_job() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "dedupe", "Deduplicating", 100,
    )
    .retryable(false)]));
    // Nothing registered for "dedupe"

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Paused).await;
    assert!(snap
        .error
        .unwrap()
        .contains("No executor found for stage dedupe"));
}

#[tokio::test(start_paused = true)]
async fn pause_respects_executor_capability() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "organize", "Organizing", 100,
    )]));
    let exec = ScriptedStageExecutor::new(vec![Ok(StageOutcome::default())]).not_pausable();
    h.registry.register("organize", Arc::new(exec));

    assert!(h.runner.start("tester", None).await.success);
    // Still queued on a current-thread runtime; the gate consults the
    // registered executor before any state changes
    let response = h.runner.pause().await;
    assert!(!response.success);
    assert!(response
        .error
        .unwrap()
        .contains("does not support pausing"));
}

#[tokio::test(start_paused = true)]
async fn stage_summaries_accumulate_across_stages() {
    let h = harness(RunnerConfig::new(vec![
        StageDescriptor::new("collect", "Collecting", 50),
        StageDescriptor::new("dedupe", "Deduplicating", 50),
    ]));
    h.registry.register(
        "collect",
        Arc::new(FnStageExecutor::new(|_ctx| async {
            let summary = serde_json::json!({"scanned": 120});
            Ok(StageOutcome::completed()
                .units(120, 120)
                .summary(summary.as_object().unwrap().clone()))
        })),
    );
    h.registry.register(
        "dedupe",
        Arc::new(FnStageExecutor::new(|_ctx| async {
            let summary = serde_json::json!({"duplicates": 7});
            Ok(StageOutcome::completed()
                .units(120, 120)
                .summary(summary.as_object().unwrap().clone()))
        })),
    );

    assert!(h.runner.start("tester", None).await.success);
    let snap = wait_for_status(&h.runner, JobStatus::Completed).await;
    assert_eq!(snap.summary["scanned"], 120);
    assert_eq!(snap.summary["duplicates"], 7);
}

#[tokio::test(start_paused = true)]
async fn activity_log_records_the_lifecycle() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect",
        "Collecting bookmarks",
        100,
    )]));
    h.registry
        .register("collect", Arc::new(ScriptedStageExecutor::completing(1, 1)));

    assert!(h.runner.start("tester", None).await.success);
    wait_for_status(&h.runner, JobStatus::Completed).await;

    let entries = h.store.activity(None).await.unwrap();
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("Job queued by tester")));
    assert!(messages
        .iter()
        .any(|m| m.contains("Starting Collecting bookmarks")));
    assert!(messages.iter().any(|m| m.contains("completed")));
}

#[tokio::test(start_paused = true)]
async fn handle_command_routes_status_and_activity() {
    let h = harness(RunnerConfig::new(vec![StageDescriptor::new(
        "collect", "Collecting", 100,
    )]));
    h.registry
        .register("collect", Arc::new(ScriptedStageExecutor::completing(1, 1)));

    let response = h
        .runner
        .handle_command(JobCommand::StartJob {
            requested_by: "cli".to_string(),
            schedule: None,
        })
        .await;
    assert!(response.success);
    wait_for_status(&h.runner, JobStatus::Completed).await;

    let status = h.runner.handle_command(JobCommand::GetJobStatus).await;
    assert!(status.success);
    assert_eq!(status.snapshot.unwrap().status, JobStatus::Completed);

    let log = h
        .runner
        .handle_command(JobCommand::GetActivityLog { limit: Some(2) })
        .await;
    assert!(log.success);
    assert_eq!(log.activity.unwrap().len(), 2);
}
