// Job System - composition root
//
// Wires the store, bus, and runner over injected ports, and owns the
// startup sequence: legacy migration, crash recovery, bus hydration.

use crate::application::bus::{BusConfig, JobBus};
use crate::application::recovery::{RecoveryAction, RecoveryService};
use crate::application::runner::{JobRunner, RunnerConfig};
use crate::application::store::{JobStore, StoreConfig};
use crate::domain::{CommandResponse, JobCommand, JobEvent};
use crate::port::{DurableStore, IdProvider, StageExecutor, StageRegistry, TimeProvider};
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Top-level configuration, one section per component
#[derive(Clone)]
pub struct SystemConfig {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub runner: RunnerConfig,
}

impl SystemConfig {
    pub fn new(runner: RunnerConfig) -> Self {
        Self {
            store: StoreConfig::default(),
            bus: BusConfig::default(),
            runner,
        }
    }
}

pub struct JobSystem {
    store: Arc<JobStore>,
    bus: Arc<JobBus>,
    runner: Arc<JobRunner>,
    recovery: RecoveryService,
    registry: Arc<StageRegistry>,
}

impl JobSystem {
    pub fn new(
        backing: Arc<dyn DurableStore>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        config: SystemConfig,
    ) -> Self {
        let store = Arc::new(JobStore::new(
            Arc::clone(&backing),
            Arc::clone(&time),
            config.store,
        ));
        let bus = Arc::new(JobBus::new(
            Arc::clone(&store),
            Arc::clone(&time),
            config.bus,
        ));
        let registry = Arc::new(StageRegistry::new());
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&time),
            ids,
            config.runner,
        ));
        let recovery = RecoveryService::new(Arc::clone(&store), time);
        Self {
            store,
            bus,
            runner,
            recovery,
            registry,
        }
    }

    /// Run once before accepting commands: pull forward any legacy record,
    /// repair interrupted state, seed the bus replay cache.
    pub async fn startup(&self) -> Result<()> {
        if self.store.migrate_from_legacy().await? {
            info!("Migrated legacy job state");
        }
        match self.recovery.recover().await? {
            RecoveryAction::Untouched => {}
            RecoveryAction::DowngradedToPaused { job_id, stage } => {
                info!(job_id = %job_id, stage = %stage, "Recovered interrupted job as paused");
            }
            RecoveryAction::FinalizedCancelled { job_id } => {
                info!(job_id = %job_id, "Recovered interrupted cancellation");
            }
        }
        self.bus.hydrate().await;
        if let Some(message) = self.store.check_quota_warning().await? {
            warn!("{}", message);
        }
        Ok(())
    }

    /// Register the business logic for one stage id
    pub fn register_stage(&self, stage_id: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        self.registry.register(stage_id, executor);
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<JobBus> {
        &self.bus
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Execute one typed command. The command itself is published first so
    /// observers see what was asked, then the structured response.
    pub async fn handle_command(&self, command: JobCommand) -> CommandResponse {
        self.bus
            .publish(JobEvent::Command {
                command: command.clone(),
            })
            .await;
        self.runner.handle_command(command).await
    }

    /// Execute a command arriving as raw JSON; a malformed payload comes
    /// back as a structured failure, never an error
    pub async fn handle_raw_command(&self, raw: serde_json::Value) -> CommandResponse {
        match serde_json::from_value::<JobCommand>(raw) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => CommandResponse::failure(format!("Unrecognized command: {}", e)),
        }
    }

    /// Periodic channel liveness sweep; the caller aborts the handle at
    /// shutdown
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.heartbeat_interval());
            // The immediate first tick would sweep before anyone registered
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bus.heartbeat().await;
            }
        })
    }

    /// Flush pending debounced writes; called once at shutdown
    pub async fn shutdown(&self) {
        self.store.flush().await;
        info!("Job system flushed and stopped");
    }
}
