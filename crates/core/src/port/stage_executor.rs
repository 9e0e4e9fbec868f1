// Stage Executor Port
// Pluggable business logic bound to one stage id. The runner knows nothing
// about bookmark scanning, embedding similarity, or HTML parsing; only about
// sequencing, retrying, and progress-weighting opaque units of work.

use crate::domain::ActivityLevel;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::watch;

/// Stage execution errors
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Stage cancelled")]
    Cancelled,

    #[error("Stage failed: {0}")]
    Failed(String),
}

/// Result of one stage execution
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub completed: bool,
    pub processed_units: Option<u64>,
    pub total_units: Option<u64>,
    pub summary: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn completed() -> Self {
        Self {
            completed: true,
            ..Self::default()
        }
    }

    pub fn units(mut self, processed: u64, total: u64) -> Self {
        self.processed_units = Some(processed);
        self.total_units = Some(total);
        self
    }

    pub fn summary(mut self, summary: serde_json::Map<String, serde_json::Value>) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Cooperative cancellation token scoped to one stage invocation.
///
/// A fresh pair is created on every start/resume so a stale token from a
/// previous pause cannot cancel a later run segment.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Poll-style check for executors iterating over units
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Await the cancellation signal
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// The firing side, held by the runner
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a linked cancel handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Runner-provided callbacks an executor uses to report incremental
/// progress and emit activity lines
#[async_trait]
pub trait StageHooks: Send + Sync {
    async fn progress(&self, processed: u64, total: Option<u64>);

    async fn activity(
        &self,
        level: ActivityLevel,
        message: &str,
        context: Option<serde_json::Value>,
    );
}

/// Everything an executor sees about the job it runs inside
#[derive(Clone)]
pub struct StageContext {
    pub job_id: String,
    pub stage: String,
    /// Last reported counts; a resumed stage restarts from here at its own
    /// granularity, the runner never rewinds
    pub processed_units: u64,
    pub total_units: Option<u64>,
    pub cancel: CancelToken,
    pub hooks: Arc<dyn StageHooks>,
}

/// Stage Executor trait
///
/// Registered once per stage id. `teardown` is always called once `prepare`
/// succeeded, whether `execute` returned or errored.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Optional setup before the first (or resumed) invocation
    async fn prepare(&self) -> Result<(), StageError> {
        Ok(())
    }

    /// The required unit of work
    async fn execute(&self, ctx: StageContext) -> Result<StageOutcome, StageError>;

    /// Optional cleanup
    async fn teardown(&self) -> Result<(), StageError> {
        Ok(())
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn can_cancel(&self) -> bool {
        true
    }
}

type BoxedStageFuture = Pin<Box<dyn Future<Output = Result<StageOutcome, StageError>> + Send>>;

/// Adapter wrapping an async closure as a stage executor, so embedders can
/// plug business logic without hand-writing the trait
pub struct FnStageExecutor {
    f: Box<dyn Fn(StageContext) -> BoxedStageFuture + Send + Sync>,
}

impl FnStageExecutor {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StageOutcome, StageError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

#[async_trait]
impl StageExecutor for FnStageExecutor {
    async fn execute(&self, ctx: StageContext) -> Result<StageOutcome, StageError> {
        (self.f)(ctx).await
    }
}

/// Executor registry keyed by stage id
#[derive(Default)]
pub struct StageRegistry {
    executors: RwLock<HashMap<String, Arc<dyn StageExecutor>>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor; replacing an existing one is allowed
    pub fn register(&self, stage_id: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        self.executors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stage_id.into(), executor);
    }

    pub fn get(&self, stage_id: &str) -> Option<Arc<dyn StageExecutor>> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(stage_id)
            .cloned()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Plays back a scripted sequence of outcomes, one per execute call
    pub struct ScriptedStageExecutor {
        script: Mutex<VecDeque<Result<StageOutcome, StageError>>>,
        execute_count: AtomicUsize,
        prepare_count: AtomicUsize,
        teardown_count: AtomicUsize,
        pausable: bool,
    }

    impl ScriptedStageExecutor {
        pub fn new(script: Vec<Result<StageOutcome, StageError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                execute_count: AtomicUsize::new(0),
                prepare_count: AtomicUsize::new(0),
                teardown_count: AtomicUsize::new(0),
                pausable: true,
            }
        }

        /// Executor that completes immediately with the given unit counts
        pub fn completing(processed: u64, total: u64) -> Self {
            Self::new(vec![Ok(StageOutcome::completed().units(processed, total))])
        }

        /// Executor that fails every attempt with the same message
        pub fn always_failing(message: &str) -> Self {
            let mut exec = Self::new(vec![]);
            exec.script = Mutex::new(
                std::iter::repeat_with(|| Err(StageError::Failed(message.to_string())))
                    .take(16)
                    .collect(),
            );
            exec
        }

        pub fn not_pausable(mut self) -> Self {
            self.pausable = false;
            self
        }

        pub fn execute_count(&self) -> usize {
            self.execute_count.load(Ordering::SeqCst)
        }

        pub fn prepare_count(&self) -> usize {
            self.prepare_count.load(Ordering::SeqCst)
        }

        pub fn teardown_count(&self) -> usize {
            self.teardown_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageExecutor for ScriptedStageExecutor {
        async fn prepare(&self) -> Result<(), StageError> {
            self.prepare_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _ctx: StageContext) -> Result<StageOutcome, StageError> {
            self.execute_count.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StageOutcome::completed()))
        }

        async fn teardown(&self) -> Result<(), StageError> {
            self.teardown_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn can_pause(&self) -> bool {
            self.pausable
        }
    }
}
