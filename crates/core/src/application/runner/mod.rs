// JobRunner - the job state machine and stage sequencer
//
// States: idle -> queued -> running <-> paused; running -> cancelling ->
// cancelled; running/queued/paused -> failed; running -> completed.
// `idle` is the absence of a snapshot. Entry to `queued` always triggers
// immediate stage execution.

pub mod constants;

#[cfg(test)]
mod tests;

use crate::application::bus::JobBus;
use crate::application::store::JobStore;
use crate::domain::{
    weighted_percent, ActivityEntry, ActivityLevel, CommandResponse, JobCommand, JobEvent,
    JobSnapshot, JobStatus, QueueMeta, StageDescriptor, StageUnits,
};
use crate::port::{
    cancel_pair, CancelHandle, CancelToken, IdProvider, StageContext, StageError, StageHooks,
    StageOutcome, StageRegistry, TimeProvider,
};
use async_trait::async_trait;
use constants::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Runner configuration, captured per job at creation time
#[derive(Clone)]
pub struct RunnerConfig {
    pub job_type: String,
    pub plan: Vec<StageDescriptor>,
    pub max_stage_retries: u32,
    pub retry_base_delay: Duration,
    /// On unrecoverable stage error: pause (resumable) instead of fail
    pub auto_pause_on_error: bool,
}

impl RunnerConfig {
    pub fn new(plan: Vec<StageDescriptor>) -> Self {
        Self {
            job_type: DEFAULT_JOB_TYPE.to_string(),
            plan,
            max_stage_retries: DEFAULT_MAX_STAGE_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            auto_pause_on_error: true,
        }
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    pub fn fail_on_error(mut self) -> Self {
        self.auto_pause_on_error = false;
        self
    }
}

struct RunnerState {
    snapshot: Option<JobSnapshot>,
    cancel: Option<CancelHandle>,
    cancel_token: Option<CancelToken>,
    retry_counts: HashMap<String, u32>,
    /// Latch against two concurrent START_JOB commands racing to create
    /// two snapshots
    starting: bool,
    /// Generation counter; a run loop whose sequence number no longer
    /// matches has been superseded and must exit
    run_seq: u64,
    executing: bool,
}

/// The state machine driving one job at a time
pub struct JobRunner {
    store: Arc<JobStore>,
    bus: Arc<JobBus>,
    registry: Arc<StageRegistry>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    config: RunnerConfig,
    state: Arc<Mutex<RunnerState>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        bus: Arc<JobBus>,
        registry: Arc<StageRegistry>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            time,
            ids,
            config,
            state: Arc::new(Mutex::new(RunnerState {
                snapshot: None,
                cancel: None,
                cancel_token: None,
                retry_counts: HashMap::new(),
                starting: false,
                run_seq: 0,
                executing: false,
            })),
        }
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Route one command; failures come back structured, never as a panic
    pub async fn handle_command(self: &Arc<Self>, command: JobCommand) -> CommandResponse {
        match command {
            JobCommand::StartJob {
                requested_by,
                schedule,
            } => self.start(&requested_by, schedule).await,
            JobCommand::PauseJob => self.pause().await,
            JobCommand::ResumeJob => self.resume().await,
            JobCommand::CancelJob => self.cancel().await,
            JobCommand::GetJobStatus => self.status().await,
            JobCommand::GetActivityLog { limit } => self.activity(limit).await,
        }
    }

    /// Start a job: rehydrate a paused snapshot of the same job type if one
    /// exists, otherwise create a fresh one. Either way the job enters
    /// `queued` and stage execution begins without further input.
    pub async fn start(
        self: &Arc<Self>,
        requested_by: &str,
        schedule: Option<String>,
    ) -> CommandResponse {
        let mut st = self.state.lock().await;
        if st.starting {
            return CommandResponse::failure("A job start is already in progress");
        }
        if let Some(active) = &st.snapshot {
            if matches!(
                active.status,
                JobStatus::Queued | JobStatus::Running | JobStatus::Cancelling
            ) {
                return CommandResponse::failure(format!(
                    "A job is already {}",
                    active.status
                ));
            }
        }
        st.starting = true;

        let now = self.time.now_millis();

        // Prefer the in-memory paused snapshot; fall back to the durable
        // slot after a restart
        let paused = match &st.snapshot {
            Some(s) if s.status == JobStatus::Paused => Some(s.clone()),
            _ => match self.store.load_snapshot().await {
                Ok(Some(s)) if s.status == JobStatus::Paused => Some(s),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Snapshot load failed during start, creating fresh job");
                    None
                }
            },
        };

        let mut rehydrated = false;
        let snapshot = match paused {
            Some(mut s) if s.job_type == self.config.job_type => {
                rehydrated = true;
                info!(job_id = %s.job_id, stage = %s.stage, "Rehydrating paused job");
                s.status = JobStatus::Queued;
                s.error = None;
                s.timestamp = now;
                s.queue_meta.requested_by = requested_by.to_string();
                s.queue_meta.requested_at = now;
                if schedule.is_some() {
                    s.queue_meta.schedule = schedule;
                }
                s
            }
            _ => {
                let order: Vec<String> =
                    self.config.plan.iter().map(|d| d.id.clone()).collect();
                let weights = self
                    .config
                    .plan
                    .iter()
                    .map(|d| (d.id.clone(), d.weight))
                    .collect();
                match JobSnapshot::new(
                    self.ids.generate_id(),
                    &self.config.job_type,
                    now,
                    order,
                    weights,
                    QueueMeta {
                        requested_by: requested_by.to_string(),
                        requested_at: now,
                        schedule,
                    },
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        st.starting = false;
                        return CommandResponse::failure(format!("Cannot create job: {}", e));
                    }
                }
            }
        };

        let job_id = snapshot.job_id.clone();
        let (handle, token) = cancel_pair();
        st.snapshot = Some(snapshot.clone());
        st.cancel = Some(handle);
        st.cancel_token = Some(token);
        st.run_seq += 1;
        st.starting = false;
        let seq = st.run_seq;

        self.persist_now(&snapshot).await;
        self.bus
            .publish(JobEvent::Status {
                job: snapshot.clone(),
            })
            .await;
        self.log_activity(
            &job_id,
            ActivityLevel::Info,
            format!("Job queued by {}", requested_by),
            Some(snapshot.stage.clone()),
        )
        .await;
        drop(st);

        // A rehydrated job keeps its mid-stage unit counts
        self.spawn_run_loop(seq, rehydrated);
        CommandResponse::started(job_id)
    }

    /// Pause a running or queued job. The write is immediate, never
    /// debounced: a user-initiated pause must survive a crash.
    pub async fn pause(self: &Arc<Self>) -> CommandResponse {
        let mut st = self.state.lock().await;
        let Some(snapshot) = st.snapshot.as_mut() else {
            return CommandResponse::failure("No active job to pause");
        };
        if !snapshot.status.is_pausable() {
            return CommandResponse::failure(format!(
                "Cannot pause a job that is {}",
                snapshot.status
            ));
        }
        if let Some(executor) = self.registry.get(&snapshot.stage) {
            if !executor.can_pause() {
                return CommandResponse::failure(format!(
                    "Stage {} does not support pausing",
                    snapshot.stage
                ));
            }
        }

        let now = self.time.now_millis();
        snapshot.status = JobStatus::Paused;
        snapshot.timestamp = now;
        snapshot.activity = "Job paused".to_string();
        let snap = snapshot.clone();
        let job_id = snap.job_id.clone();
        let stage = snap.stage.clone();

        if let Some(cancel) = &st.cancel {
            cancel.cancel();
        }
        st.run_seq += 1;
        // The superseded run loop exits on its seq check without clearing
        // this; a later cancel must see the slot as idle
        st.executing = false;

        self.persist_now(&snap).await;
        self.bus.publish(JobEvent::Status { job: snap }).await;
        self.log_activity(&job_id, ActivityLevel::Info, "Job paused", Some(stage))
            .await;
        CommandResponse::ok()
    }

    /// Resume a paused job; the current stage restarts from its last
    /// reported processed count under a fresh cancellation token
    pub async fn resume(self: &Arc<Self>) -> CommandResponse {
        let mut st = self.state.lock().await;
        let Some(snapshot) = st.snapshot.as_mut() else {
            return CommandResponse::failure("No active job to resume");
        };
        if snapshot.status != JobStatus::Paused {
            return CommandResponse::failure(format!(
                "Cannot resume a job that is {}",
                snapshot.status
            ));
        }

        let now = self.time.now_millis();
        snapshot.status = JobStatus::Running;
        snapshot.timestamp = now;
        snapshot.error = None;
        snapshot.activity = "Job resumed".to_string();
        let snap = snapshot.clone();
        let job_id = snap.job_id.clone();
        let stage = snap.stage.clone();

        let (handle, token) = cancel_pair();
        st.cancel = Some(handle);
        st.cancel_token = Some(token);
        st.run_seq += 1;
        let seq = st.run_seq;

        self.persist_now(&snap).await;
        self.bus.publish(JobEvent::Status { job: snap }).await;
        self.log_activity(&job_id, ActivityLevel::Info, "Job resumed", Some(stage))
            .await;
        drop(st);

        self.spawn_run_loop(seq, true);
        CommandResponse::ok()
    }

    /// Cancel any non-terminal job
    pub async fn cancel(self: &Arc<Self>) -> CommandResponse {
        let mut st = self.state.lock().await;
        let Some(snapshot) = st.snapshot.as_mut() else {
            return CommandResponse::failure("No active job to cancel");
        };
        if snapshot.status.is_terminal() {
            return CommandResponse::failure(format!(
                "Job is already {}",
                snapshot.status
            ));
        }
        if let Some(executor) = self.registry.get(&snapshot.stage) {
            if !executor.can_cancel() {
                return CommandResponse::failure(format!(
                    "Stage {} does not support cancelling",
                    snapshot.stage
                ));
            }
        }

        let now = self.time.now_millis();
        snapshot.status = JobStatus::Cancelling;
        snapshot.timestamp = now;
        let snap = snapshot.clone();
        let job_id = snap.job_id.clone();
        let stage = snap.stage.clone();

        if let Some(cancel) = &st.cancel {
            cancel.cancel();
        }

        self.persist_now(&snap).await;
        self.bus.publish(JobEvent::Status { job: snap }).await;
        self.log_activity(&job_id, ActivityLevel::Info, "Cancelling job", Some(stage))
            .await;

        // With no stage in flight nobody else will finalize
        if !st.executing {
            self.finalize_locked(&mut st, JobStatus::Cancelled).await;
        }
        CommandResponse::ok()
    }

    /// Current snapshot, falling back to the durable slot
    pub async fn status(self: &Arc<Self>) -> CommandResponse {
        let st = self.state.lock().await;
        if let Some(snapshot) = &st.snapshot {
            return CommandResponse::with_snapshot(Some(snapshot.clone()));
        }
        drop(st);
        match self.store.load_snapshot().await {
            Ok(snapshot) => CommandResponse::with_snapshot(snapshot),
            Err(e) => CommandResponse::failure(format!("Status lookup failed: {}", e)),
        }
    }

    pub async fn activity(self: &Arc<Self>, limit: Option<usize>) -> CommandResponse {
        match self.store.activity(limit).await {
            Ok(entries) => CommandResponse::with_activity(entries),
            Err(e) => CommandResponse::failure(format!("Activity lookup failed: {}", e)),
        }
    }

    /// In-memory snapshot, for composition-level introspection and tests
    pub async fn current_snapshot(&self) -> Option<JobSnapshot> {
        self.state.lock().await.snapshot.clone()
    }

    // ------------------------------------------------------------------
    // Stage sequencing
    // ------------------------------------------------------------------

    fn spawn_run_loop(self: &Arc<Self>, seq: u64, skip_enter: bool) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run_loop(seq, skip_enter).await;
        });
    }

    /// Drive stages until the job finishes, pauses, or is superseded.
    /// `skip_enter` preserves the current stage's units on resume and on
    /// retry instead of resetting them.
    async fn run_loop(self: Arc<Self>, my_seq: u64, mut skip_enter: bool) {
        loop {
            // Enter / recheck phase
            {
                let mut st = self.state.lock().await;
                if st.run_seq != my_seq {
                    return;
                }
                let Some(status) = st.snapshot.as_ref().map(|s| s.status) else {
                    return;
                };
                match status {
                    JobStatus::Paused
                    | JobStatus::Cancelled
                    | JobStatus::Completed
                    | JobStatus::Failed => {
                        st.executing = false;
                        return;
                    }
                    JobStatus::Cancelling => {
                        self.finalize_locked(&mut st, JobStatus::Cancelled).await;
                        return;
                    }
                    JobStatus::Queued | JobStatus::Running => {}
                }

                let plan_done = st
                    .snapshot
                    .as_ref()
                    .is_some_and(|s| s.stage_index >= s.stage_order.len());
                if plan_done {
                    self.finalize_locked(&mut st, JobStatus::Completed).await;
                    return;
                }
                st.executing = true;

                let Some(snapshot) = st.snapshot.as_mut() else {
                    st.executing = false;
                    return;
                };
                if !skip_enter {
                    let stage = snapshot.stage_order[snapshot.stage_index].clone();
                    let now = self.time.now_millis();
                    if let Err(e) = snapshot.begin_stage(&stage, now) {
                        error!(error = %e, "Stage entry rejected");
                        st.executing = false;
                        return;
                    }
                    snapshot.weighted_percent = weighted_percent(
                        &snapshot.stage_order,
                        &snapshot.stage_weights,
                        snapshot.stage_index,
                        &snapshot.stage_units,
                    );
                    let snap = snapshot.clone();
                    self.persist_now(&snap).await;
                    self.bus.publish(JobEvent::Status { job: snap }).await;
                } else if snapshot.status == JobStatus::Queued {
                    // Rehydrated mid-stage: promote to running without
                    // resetting the preserved unit counts
                    let now = self.time.now_millis();
                    snapshot.status = JobStatus::Running;
                    snapshot.timestamp = now;
                    if snapshot.started_at.is_none() {
                        snapshot.started_at = Some(now);
                    }
                    let snap = snapshot.clone();
                    self.persist_now(&snap).await;
                    self.bus.publish(JobEvent::Status { job: snap }).await;
                }
                skip_enter = false;
            }

            // Execute phase, lock released so commands can interleave
            let result = self.run_stage_once(my_seq).await;

            // Outcome phase
            let mut st = self.state.lock().await;
            if st.run_seq != my_seq {
                return;
            }
            let Some(snapshot) = st.snapshot.as_ref() else {
                st.executing = false;
                return;
            };
            match snapshot.status {
                JobStatus::Paused => {
                    st.executing = false;
                    return;
                }
                JobStatus::Cancelling => {
                    self.finalize_locked(&mut st, JobStatus::Cancelled).await;
                    return;
                }
                _ => {}
            }

            let failure: String = match result {
                Ok(outcome) if outcome.completed => {
                    self.complete_stage_locked(&mut st, outcome).await;
                    continue;
                }
                Ok(outcome) => outcome
                    .error
                    .unwrap_or_else(|| "Stage ended without completing".to_string()),
                Err(StageError::Cancelled) => {
                    // Token fired but no pause/cancel landed; treat as a
                    // stage-level failure
                    "Stage cancelled unexpectedly".to_string()
                }
                Err(StageError::Failed(msg)) => msg,
            };

            match self.handle_stage_error_locked(&mut st, failure).await {
                ErrorDisposition::Retry(delay) => {
                    drop(st);
                    tokio::time::sleep(delay).await;
                    skip_enter = true;
                }
                ErrorDisposition::Stopped => return,
            }
        }
    }

    /// One attempt at the current stage: executor lookup, prepare, execute,
    /// teardown. Teardown always runs once prepare succeeded.
    async fn run_stage_once(self: &Arc<Self>, my_seq: u64) -> Result<StageOutcome, StageError> {
        let (job_id, stage_id, units, cancel) = {
            let st = self.state.lock().await;
            if st.run_seq != my_seq {
                return Err(StageError::Cancelled);
            }
            let Some(snapshot) = st.snapshot.as_ref() else {
                return Err(StageError::Cancelled);
            };
            let Some(token) = st.cancel_token.clone() else {
                return Err(StageError::Cancelled);
            };
            (
                snapshot.job_id.clone(),
                snapshot.stage.clone(),
                snapshot.stage_units.clone(),
                token,
            )
        };

        let Some(executor) = self.registry.get(&stage_id) else {
            return Err(StageError::Failed(format!(
                "No executor found for stage {}",
                stage_id
            )));
        };

        let display_name = self
            .config
            .plan
            .iter()
            .find(|d| d.id == stage_id)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| stage_id.clone());
        self.log_activity(
            &job_id,
            ActivityLevel::Info,
            format!("Starting {}", display_name),
            Some(stage_id.clone()),
        )
        .await;

        executor.prepare().await?;

        let ctx = StageContext {
            job_id: job_id.clone(),
            stage: stage_id.clone(),
            processed_units: units.processed,
            total_units: units.total,
            cancel,
            hooks: Arc::new(RunnerHooks {
                state: Arc::clone(&self.state),
                store: Arc::clone(&self.store),
                bus: Arc::clone(&self.bus),
                time: Arc::clone(&self.time),
                seq: my_seq,
                job_id,
                stage: stage_id,
            }),
        };

        let result = executor.execute(ctx).await;
        if let Err(e) = executor.teardown().await {
            warn!(error = %e, "Stage teardown failed");
        }
        result
    }

    /// Retry-or-stop decision for a failed stage. Mirrors the policy:
    /// retryable stages get up to `max_stage_retries` re-runs with a
    /// linearly scaled delay, then the job pauses (default) or fails.
    async fn handle_stage_error_locked(
        self: &Arc<Self>,
        st: &mut RunnerState,
        message: String,
    ) -> ErrorDisposition {
        let Some(snapshot) = st.snapshot.as_mut() else {
            st.executing = false;
            return ErrorDisposition::Stopped;
        };
        let stage_id = snapshot.stage.clone();
        let job_id = snapshot.job_id.clone();
        let retryable = self
            .config
            .plan
            .iter()
            .find(|d| d.id == stage_id)
            .map(|d| d.retryable)
            .unwrap_or(false);
        let attempts = st.retry_counts.get(&stage_id).copied().unwrap_or(0);

        if retryable && attempts < self.config.max_stage_retries {
            let attempt = attempts + 1;
            st.retry_counts.insert(stage_id.clone(), attempt);
            let delay = self.config.retry_base_delay * attempt;
            self.log_activity(
                &job_id,
                ActivityLevel::Warn,
                format!(
                    "Stage {} failed: {}; retrying (attempt {}/{})",
                    stage_id, message, attempt, self.config.max_stage_retries
                ),
                Some(stage_id),
            )
            .await;
            return ErrorDisposition::Retry(delay);
        }

        st.retry_counts.remove(&stage_id);
        snapshot.error = Some(message.clone());

        if self.config.auto_pause_on_error {
            let now = self.time.now_millis();
            snapshot.status = JobStatus::Paused;
            snapshot.timestamp = now;
            snapshot.activity = format!("Paused after stage error: {}", message);
            let snap = snapshot.clone();
            self.persist_now(&snap).await;
            self.bus.publish(JobEvent::Status { job: snap }).await;
            self.log_activity(
                &job_id,
                ActivityLevel::Error,
                format!("Stage {} failed: {}", stage_id, message),
                Some(stage_id),
            )
            .await;
            st.executing = false;
        } else {
            self.log_activity(
                &job_id,
                ActivityLevel::Error,
                format!("Stage {} failed: {}", stage_id, message),
                Some(stage_id),
            )
            .await;
            self.finalize_locked(st, JobStatus::Failed).await;
        }
        ErrorDisposition::Stopped
    }

    /// Finalize the stage's unit counts, fold its summary into the job,
    /// clear its retry counter, and advance the plan
    async fn complete_stage_locked(self: &Arc<Self>, st: &mut RunnerState, outcome: StageOutcome) {
        let Some(snapshot) = st.snapshot.as_mut() else {
            return;
        };
        let stage_id = snapshot.stage.clone();
        let job_id = snapshot.job_id.clone();

        if let Some(processed) = outcome.processed_units {
            snapshot.stage_units.processed = processed;
        }
        if let Some(total) = outcome.total_units {
            snapshot.stage_units.total = Some(total);
        }
        if let Some(summary) = &outcome.summary {
            snapshot.merge_summary(summary);
        }
        st.retry_counts.remove(&stage_id);

        // Full credit for the finished stage
        snapshot.weighted_percent = weighted_percent(
            &snapshot.stage_order,
            &snapshot.stage_weights,
            snapshot.stage_index + 1,
            &StageUnits::default(),
        );
        snapshot.indeterminate = false;
        snapshot.timestamp = self.time.now_millis();

        let snap = snapshot.clone();
        self.persist_now(&snap).await;
        self.bus.publish(JobEvent::Status { job: snap }).await;
        self.log_activity(
            &job_id,
            ActivityLevel::Info,
            format!("Stage {} completed", stage_id),
            Some(stage_id.clone()),
        )
        .await;

        if let Some(snapshot) = st.snapshot.as_mut() {
            snapshot.stage_index += 1;
        }
    }

    /// Terminal transition: compute runtime, fold it into the summary,
    /// archive to history, clear the active slot, release the cancel
    /// signal and retry counters
    async fn finalize_locked(self: &Arc<Self>, st: &mut RunnerState, status: JobStatus) {
        let Some(snapshot) = st.snapshot.as_mut() else {
            return;
        };
        let now = self.time.now_millis();
        let runtime_ms = now - snapshot.started_at.unwrap_or(snapshot.created_at);

        snapshot.status = status;
        snapshot.timestamp = now;
        if status == JobStatus::Completed {
            snapshot.completed_at = Some(now);
            snapshot.weighted_percent = 100;
            snapshot.indeterminate = false;
        }

        let mut closing = serde_json::Map::new();
        closing.insert("runtimeMs".to_string(), serde_json::json!(runtime_ms));
        if let Some(started) = snapshot.started_at {
            closing.insert("startedAt".to_string(), serde_json::json!(started));
        }
        closing.insert("finishedAt".to_string(), serde_json::json!(now));
        snapshot.merge_summary(&closing);

        let (message, level) = match status {
            JobStatus::Completed => (format!("Job completed in {}ms", runtime_ms), ActivityLevel::Info),
            JobStatus::Cancelled => ("Job cancelled".to_string(), ActivityLevel::Info),
            _ => (
                format!(
                    "Job failed: {}",
                    snapshot.error.as_deref().unwrap_or("unknown error")
                ),
                ActivityLevel::Error,
            ),
        };
        snapshot.activity = message.clone();

        let snap = snapshot.clone();
        self.persist_now(&snap).await;
        if let Err(e) = self.store.add_to_history(&snap).await {
            warn!(error = %e, "History archive failed");
        }
        if let Err(e) = self.store.clear_snapshot().await {
            warn!(error = %e, "Active slot clear failed");
        }
        self.bus
            .publish(JobEvent::Status { job: snap.clone() })
            .await;
        self.log_activity(&snap.job_id, level, message, Some(snap.stage.clone()))
            .await;

        st.cancel = None;
        st.cancel_token = None;
        st.retry_counts.clear();
        st.executing = false;
        info!(job_id = %snap.job_id, status = %status, runtime_ms = runtime_ms, "Job finalized");
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Immediate persist for state transitions. Failures are logged and
    /// swallowed; they must never derail the execution path
    async fn persist_now(&self, snapshot: &JobSnapshot) {
        if let Err(e) = self.store.save_snapshot_now(snapshot).await {
            error!(job_id = %snapshot.job_id, error = %e, "Snapshot persist failed");
        }
    }

    async fn log_activity(
        &self,
        job_id: &str,
        level: ActivityLevel,
        message: impl Into<String>,
        stage: Option<String>,
    ) {
        let mut entry = ActivityEntry::new(job_id, self.time.now_millis(), level, message);
        if let Some(stage) = stage {
            entry = entry.stage(stage);
        }
        if let Err(e) = self.store.append_activity(&entry).await {
            warn!(error = %e, "Activity append failed");
        }
        self.bus
            .publish(JobEvent::Activity { activity: entry })
            .await;
    }
}

enum ErrorDisposition {
    Retry(Duration),
    Stopped,
}

/// Runner-side implementation of the executor callbacks
struct RunnerHooks {
    state: Arc<Mutex<RunnerState>>,
    store: Arc<JobStore>,
    bus: Arc<JobBus>,
    time: Arc<dyn TimeProvider>,
    /// Hooks from a superseded run segment become inert
    seq: u64,
    job_id: String,
    stage: String,
}

#[async_trait]
impl StageHooks for RunnerHooks {
    async fn progress(&self, processed: u64, total: Option<u64>) {
        let snap = {
            let mut st = self.state.lock().await;
            if st.run_seq != self.seq {
                return;
            }
            let Some(snapshot) = st.snapshot.as_mut() else {
                return;
            };
            snapshot.stage_units = StageUnits { processed, total };
            snapshot.indeterminate = !matches!(total, Some(t) if t > 0);
            snapshot.weighted_percent = weighted_percent(
                &snapshot.stage_order,
                &snapshot.stage_weights,
                snapshot.stage_index,
                &snapshot.stage_units,
            );
            snapshot.timestamp = self.time.now_millis();
            snapshot.clone()
        };

        // Debounced persist path for rapid progress updates
        if let Err(e) = self.store.save_snapshot(&snap).await {
            warn!(error = %e, "Progress persist failed");
        }
        self.bus
            .publish(JobEvent::StageProgress {
                stage: self.stage.clone(),
                processed,
                total,
                job: snap,
            })
            .await;
    }

    async fn activity(
        &self,
        level: ActivityLevel,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        {
            let mut st = self.state.lock().await;
            if st.run_seq != self.seq {
                return;
            }
            if let Some(snapshot) = st.snapshot.as_mut() {
                snapshot.activity = message.to_string();
                snapshot.timestamp = self.time.now_millis();
            }
        }

        let mut entry = ActivityEntry::new(&self.job_id, self.time.now_millis(), level, message)
            .stage(self.stage.clone());
        if let Some(context) = context {
            entry = entry.context(context);
        }
        if let Err(e) = self.store.append_activity(&entry).await {
            warn!(error = %e, "Activity append failed");
        }
        self.bus
            .publish(JobEvent::Activity { activity: entry })
            .await;
    }
}
