// Startup recovery
//
// A snapshot left in `queued` or `running` means the previous process died
// mid-job. The job is downgraded to `paused` so the user decides whether to
// pick it back up; an interrupted `cancelling` job is finalized as
// `cancelled` since the intent was already recorded.

use crate::application::store::JobStore;
use crate::domain::{ActivityEntry, ActivityLevel, JobSnapshot, JobStatus};
use crate::port::TimeProvider;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// What recovery did with the persisted snapshot, if anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No snapshot, or one already paused
    Untouched,
    /// Interrupted queued/running job parked as paused
    DowngradedToPaused { job_id: String, stage: String },
    /// Interrupted cancellation carried through to cancelled
    FinalizedCancelled { job_id: String },
}

pub struct RecoveryService {
    store: Arc<JobStore>,
    time: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(store: Arc<JobStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self { store, time }
    }

    /// Inspect the persisted snapshot and repair interrupted state. Runs
    /// once at startup, before any command is accepted.
    pub async fn recover(&self) -> Result<RecoveryAction> {
        let Some(snapshot) = self.store.load_snapshot().await? else {
            return Ok(RecoveryAction::Untouched);
        };

        match snapshot.status {
            JobStatus::Queued | JobStatus::Running => self.downgrade(snapshot).await,
            JobStatus::Cancelling => self.finalize_cancelled(snapshot).await,
            JobStatus::Paused => Ok(RecoveryAction::Untouched),
            // Terminal snapshots in the active slot mean the archive step
            // was interrupted; move them into history now
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed => {
                warn!(job_id = %snapshot.job_id, status = %snapshot.status,
                    "Terminal snapshot found in active slot, archiving");
                self.store.add_to_history(&snapshot).await?;
                self.store.clear_snapshot().await?;
                Ok(RecoveryAction::Untouched)
            }
        }
    }

    async fn downgrade(&self, mut snapshot: JobSnapshot) -> Result<RecoveryAction> {
        let now = self.time.now_millis();
        let prior = snapshot.status;
        snapshot.status = JobStatus::Paused;
        snapshot.timestamp = now;
        snapshot.activity = "Job interrupted by restart, paused".to_string();

        self.store.save_snapshot_now(&snapshot).await?;
        let entry = ActivityEntry::new(
            &snapshot.job_id,
            now,
            ActivityLevel::Warn,
            format!("Job was {} when the engine stopped; paused for resume", prior),
        )
        .stage(snapshot.stage.clone());
        self.store.append_activity(&entry).await?;

        info!(job_id = %snapshot.job_id, stage = %snapshot.stage, prior = %prior,
            "Interrupted job parked as paused");
        Ok(RecoveryAction::DowngradedToPaused {
            job_id: snapshot.job_id,
            stage: snapshot.stage,
        })
    }

    async fn finalize_cancelled(&self, mut snapshot: JobSnapshot) -> Result<RecoveryAction> {
        let now = self.time.now_millis();
        snapshot.status = JobStatus::Cancelled;
        snapshot.timestamp = now;
        snapshot.activity = "Job cancelled".to_string();

        self.store.add_to_history(&snapshot).await?;
        self.store.clear_snapshot().await?;
        let entry = ActivityEntry::new(
            &snapshot.job_id,
            now,
            ActivityLevel::Info,
            "Cancellation completed after restart",
        )
        .stage(snapshot.stage.clone());
        self.store.append_activity(&entry).await?;

        info!(job_id = %snapshot.job_id, "Interrupted cancellation finalized");
        Ok(RecoveryAction::FinalizedCancelled {
            job_id: snapshot.job_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::store::{keys, StoreConfig};
    use crate::domain::QueueMeta;
    use crate::port::durable_store::mocks::MemoryStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use std::collections::BTreeMap;

    fn snapshot_with_status(status: JobStatus) -> JobSnapshot {
        let order = vec!["collect".to_string()];
        let weights = BTreeMap::from([("collect".to_string(), 100)]);
        let mut snap = JobSnapshot::new(
            "job-1",
            "library_maintenance",
            1_000,
            order,
            weights,
            QueueMeta::default(),
        )
        .unwrap();
        snap.status = status;
        snap
    }

    fn service(backing: Arc<MemoryStore>) -> (RecoveryService, Arc<JobStore>) {
        let time: Arc<dyn TimeProvider> = Arc::new(FixedTimeProvider::new(5_000));
        let store = Arc::new(JobStore::new(backing, Arc::clone(&time), StoreConfig::default()));
        (RecoveryService::new(Arc::clone(&store), time), store)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_store_is_untouched() {
        let (svc, _store) = service(Arc::new(MemoryStore::new()));
        assert_eq!(svc.recover().await.unwrap(), RecoveryAction::Untouched);
    }

    #[tokio::test(start_paused = true)]
    async fn running_job_is_parked_as_paused() {
        let backing = Arc::new(MemoryStore::new());
        let (svc, store) = service(backing.clone());
        store
            .save_snapshot_now(&snapshot_with_status(JobStatus::Running))
            .await
            .unwrap();

        let action = svc.recover().await.unwrap();
        assert_eq!(
            action,
            RecoveryAction::DowngradedToPaused {
                job_id: "job-1".to_string(),
                stage: "collect".to_string(),
            }
        );
        assert_eq!(backing.peek(keys::SNAPSHOT).unwrap()["status"], "paused");

        let entries = store.activity(None).await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.message.contains("paused for resume")));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_job_is_parked_as_paused() {
        let backing = Arc::new(MemoryStore::new());
        let (svc, store) = service(backing.clone());
        store
            .save_snapshot_now(&snapshot_with_status(JobStatus::Queued))
            .await
            .unwrap();

        let action = svc.recover().await.unwrap();
        assert!(matches!(
            action,
            RecoveryAction::DowngradedToPaused { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_job_is_finalized() {
        let backing = Arc::new(MemoryStore::new());
        let (svc, store) = service(backing.clone());
        store
            .save_snapshot_now(&snapshot_with_status(JobStatus::Cancelling))
            .await
            .unwrap();

        let action = svc.recover().await.unwrap();
        assert_eq!(
            action,
            RecoveryAction::FinalizedCancelled {
                job_id: "job-1".to_string()
            }
        );
        assert!(backing.peek(keys::SNAPSHOT).is_none());

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].snapshot.status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_job_is_left_alone() {
        let backing = Arc::new(MemoryStore::new());
        let (svc, store) = service(backing.clone());
        store
            .save_snapshot_now(&snapshot_with_status(JobStatus::Paused))
            .await
            .unwrap();

        assert_eq!(svc.recover().await.unwrap(), RecoveryAction::Untouched);
        assert_eq!(backing.peek(keys::SNAPSHOT).unwrap()["status"], "paused");
        assert!(store.activity(None).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stranded_terminal_snapshot_is_archived() {
        let backing = Arc::new(MemoryStore::new());
        let (svc, store) = service(backing.clone());
        store
            .save_snapshot_now(&snapshot_with_status(JobStatus::Completed))
            .await
            .unwrap();

        assert_eq!(svc.recover().await.unwrap(), RecoveryAction::Untouched);
        assert!(backing.peek(keys::SNAPSHOT).is_none());
        assert_eq!(store.history().await.unwrap().len(), 1);
    }
}
