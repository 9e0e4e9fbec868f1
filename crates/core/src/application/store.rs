// JobStore - durable persistence layer over the DurableStore port
//
// Owns the snapshot slot, the capped activity log, the history ring, the
// last-event fallback record, legacy migration and quota reporting.

use crate::application::debounce::DebouncedWriter;
use crate::domain::{ActivityEntry, HistoryEntry, JobEvent, JobSnapshot, JobStatus};
use crate::error::Result;
use crate::port::{DurableStore, TimeProvider};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Logical bucket keys within the durable store
pub mod keys {
    pub const SNAPSHOT: &str = "linkward:job:snapshot";
    pub const ACTIVITY: &str = "linkward:job:activity";
    pub const HISTORY: &str = "linkward:job:history";
    pub const LAST_EVENT: &str = "linkward:job:last_event";
    pub const MIGRATION_MARKER: &str = "linkward:job:migrated";

    // Keys written by the pre-engine organizer builds
    pub const LEGACY_STATE: &str = "aiJobState";
    pub const LEGACY_ACTIVITY: &str = "aiJobActivity";
}

/// Store tuning knobs
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Coalescing window for non-paused snapshot writes
    pub snapshot_debounce: Duration,
    /// Coalescing window for the last-event fallback record
    pub last_event_debounce: Duration,
    /// Most-recent activity entries kept
    pub activity_cap: usize,
    /// Terminal snapshots kept in history
    pub history_cap: usize,
    /// Byte usage above which a quota warning is reported
    pub quota_warning_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_debounce: Duration::from_millis(500),
            last_event_debounce: Duration::from_millis(300),
            activity_cap: 100,
            history_cap: 10,
            quota_warning_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Byte usage per logical bucket
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub snapshot_bytes: u64,
    pub activity_bytes: u64,
    pub history_bytes: u64,
    pub last_event_bytes: u64,
    pub total_bytes: u64,
}

/// Persistence layer for job state
pub struct JobStore {
    store: Arc<dyn DurableStore>,
    writer: DebouncedWriter,
    config: StoreConfig,
    time: Arc<dyn TimeProvider>,
}

impl JobStore {
    pub fn new(
        store: Arc<dyn DurableStore>,
        time: Arc<dyn TimeProvider>,
        config: StoreConfig,
    ) -> Self {
        Self {
            writer: DebouncedWriter::new(Arc::clone(&store)),
            store,
            config,
            time,
        }
    }

    // ------------------------------------------------------------------
    // Snapshot slot
    // ------------------------------------------------------------------

    /// Persist the snapshot. Paused and terminal snapshots are written
    /// immediately (a user-initiated pause must survive a crash); all other
    /// writes are debounced to batch rapid progress updates.
    pub async fn save_snapshot(&self, snapshot: &JobSnapshot) -> Result<()> {
        snapshot.validate()?;
        let value = serde_json::to_value(snapshot)?;
        if snapshot.status == JobStatus::Paused || snapshot.status.is_terminal() {
            self.writer.flush_now(keys::SNAPSHOT, value).await?;
        } else {
            self.writer
                .schedule(keys::SNAPSHOT, value, self.config.snapshot_debounce);
        }
        Ok(())
    }

    /// Persist the snapshot immediately regardless of status; used for
    /// state transitions
    pub async fn save_snapshot_now(&self, snapshot: &JobSnapshot) -> Result<()> {
        snapshot.validate()?;
        let value = serde_json::to_value(snapshot)?;
        self.writer.flush_now(keys::SNAPSHOT, value).await?;
        Ok(())
    }

    /// Load the active snapshot. An invalid record is logged and treated as
    /// absent so a corrupted record can never wedge the runner.
    pub async fn load_snapshot(&self) -> Result<Option<JobSnapshot>> {
        let raw = match self.writer.pending_value(keys::SNAPSHOT) {
            Some(pending) => Some(pending),
            None => self.store.get(keys::SNAPSHOT).await?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_value::<JobSnapshot>(raw) {
            Ok(snapshot) => match snapshot.validate() {
                Ok(()) => Ok(Some(snapshot)),
                Err(e) => {
                    warn!(error = %e, "Stored snapshot failed validation, treating as absent");
                    Ok(None)
                }
            },
            Err(e) => {
                warn!(error = %e, "Stored snapshot is malformed, treating as absent");
                Ok(None)
            }
        }
    }

    /// Clear the active slot (after the snapshot moved into history)
    pub async fn clear_snapshot(&self) -> Result<()> {
        self.writer.cancel(keys::SNAPSHOT);
        self.store.remove(keys::SNAPSHOT).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    /// Append one activity entry. Invalid entries are dropped, not stored;
    /// returns whether the entry was kept.
    pub async fn append_activity(&self, entry: &ActivityEntry) -> Result<bool> {
        if let Err(e) = entry.validate() {
            warn!(error = %e, "Dropping invalid activity entry");
            return Ok(false);
        }

        let mut entries = self.load_activity().await?;
        entries.push(entry.clone());
        if entries.len() > self.config.activity_cap {
            let excess = entries.len() - self.config.activity_cap;
            entries.drain(0..excess);
        }
        self.store
            .set(keys::ACTIVITY, serde_json::to_value(&entries)?)
            .await?;

        // Keep the snapshot's last-activity time current even though
        // activity lives in its own bucket
        if let Some(mut snapshot) = self.load_snapshot().await? {
            if snapshot.job_id == entry.job_id {
                snapshot.timestamp = entry.timestamp;
                self.writer.schedule(
                    keys::SNAPSHOT,
                    serde_json::to_value(&snapshot)?,
                    self.config.snapshot_debounce,
                );
            }
        }
        Ok(true)
    }

    /// The last `limit` activity entries, oldest first
    pub async fn activity(&self, limit: Option<usize>) -> Result<Vec<ActivityEntry>> {
        let entries = self.load_activity().await?;
        let limit = limit.unwrap_or(self.config.activity_cap);
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    async fn load_activity(&self) -> Result<Vec<ActivityEntry>> {
        let Some(raw) = self.store.get(keys::ACTIVITY).await? else {
            return Ok(Vec::new());
        };
        let Some(items) = raw.as_array() else {
            warn!("Activity bucket is not a list, resetting");
            return Ok(Vec::new());
        };
        // Individually malformed entries are skipped, not fatal
        Ok(items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .filter(|entry: &ActivityEntry| entry.validate().is_ok())
            .collect())
    }

    // ------------------------------------------------------------------
    // History ring
    // ------------------------------------------------------------------

    /// Archive a terminal snapshot
    pub async fn add_to_history(&self, snapshot: &JobSnapshot) -> Result<()> {
        let mut entries = self.history().await?;
        entries.push(HistoryEntry {
            snapshot: snapshot.clone(),
            history_timestamp: self.time.now_millis(),
        });
        if entries.len() > self.config.history_cap {
            let excess = entries.len() - self.config.history_cap;
            entries.drain(0..excess);
        }
        self.store
            .set(keys::HISTORY, serde_json::to_value(&entries)?)
            .await?;
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let Some(raw) = self.store.get(keys::HISTORY).await? else {
            return Ok(Vec::new());
        };
        let Some(items) = raw.as_array() else {
            warn!("History bucket is not a list, resetting");
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect())
    }

    // ------------------------------------------------------------------
    // Last-event fallback (durable ring buffer of one)
    // ------------------------------------------------------------------

    /// Debounced write of the latest status-class event, so an observer
    /// that connects after a change still sees it
    pub fn save_last_event(&self, event: &JobEvent) {
        match serde_json::to_value(event) {
            Ok(value) => {
                self.writer
                    .schedule(keys::LAST_EVENT, value, self.config.last_event_debounce);
            }
            Err(e) => warn!(error = %e, "Failed to serialize last event"),
        }
    }

    pub async fn load_last_event(&self) -> Result<Option<JobEvent>> {
        let raw = match self.writer.pending_value(keys::LAST_EVENT) {
            Some(pending) => Some(pending),
            None => self.store.get(keys::LAST_EVENT).await?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!(error = %e, "Stored last event is malformed, treating as absent");
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Prune activity and history entries older than the cutoff; returns
    /// the number removed
    pub async fn cleanup(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = self.time.now_millis() - max_age_days * 24 * 60 * 60 * 1000;
        let mut removed = 0;

        let activity = self.load_activity().await?;
        let kept: Vec<ActivityEntry> = activity
            .into_iter()
            .filter(|e| {
                if e.timestamp >= cutoff {
                    true
                } else {
                    removed += 1;
                    false
                }
            })
            .collect();
        self.store
            .set(keys::ACTIVITY, serde_json::to_value(&kept)?)
            .await?;

        let history = self.history().await?;
        let kept: Vec<HistoryEntry> = history
            .into_iter()
            .filter(|e| {
                if e.history_timestamp >= cutoff {
                    true
                } else {
                    removed += 1;
                    false
                }
            })
            .collect();
        self.store
            .set(keys::HISTORY, serde_json::to_value(&kept)?)
            .await?;

        info!(removed = removed, max_age_days = max_age_days, "Storage cleanup finished");
        Ok(removed)
    }

    /// Copy what we can from pre-engine organizer keys into the current
    /// schema, then delete them. Idempotent via a persisted marker; failures
    /// are logged and never block startup.
    pub async fn migrate_from_legacy(&self) -> Result<bool> {
        if self.store.get(keys::MIGRATION_MARKER).await?.is_some() {
            return Ok(false);
        }

        if let Some(raw) = self.store.get(keys::LEGACY_STATE).await? {
            match legacy_state_to_snapshot(&raw, self.time.now_millis()) {
                Some(snapshot) => {
                    info!(job_id = %snapshot.job_id, "Migrating legacy job state");
                    if let Err(e) = self.save_snapshot_now(&snapshot).await {
                        warn!(error = %e, "Legacy snapshot migration failed");
                    }
                }
                None => warn!("Legacy job state unrecognizable, skipping"),
            }
            self.store.remove(keys::LEGACY_STATE).await?;
        }

        if let Some(raw) = self.store.get(keys::LEGACY_ACTIVITY).await? {
            let migrated = legacy_activity_entries(&raw);
            if !migrated.is_empty() {
                info!(count = migrated.len(), "Migrating legacy activity entries");
                self.store
                    .set(keys::ACTIVITY, serde_json::to_value(&migrated)?)
                    .await?;
            }
            self.store.remove(keys::LEGACY_ACTIVITY).await?;
        }

        self.store
            .set(
                keys::MIGRATION_MARKER,
                serde_json::json!({ "migratedAt": self.time.now_millis() }),
            )
            .await?;
        Ok(true)
    }

    /// Bytes used per logical bucket
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let snapshot_bytes = self.store.bytes_in_use(&[keys::SNAPSHOT]).await?;
        let activity_bytes = self.store.bytes_in_use(&[keys::ACTIVITY]).await?;
        let history_bytes = self.store.bytes_in_use(&[keys::HISTORY]).await?;
        let last_event_bytes = self.store.bytes_in_use(&[keys::LAST_EVENT]).await?;
        Ok(StorageStats {
            snapshot_bytes,
            activity_bytes,
            history_bytes,
            last_event_bytes,
            total_bytes: snapshot_bytes + activity_bytes + history_bytes + last_event_bytes,
        })
    }

    /// A human-readable warning when usage crosses the configured budget
    pub async fn check_quota_warning(&self) -> Result<Option<String>> {
        let stats = self.storage_stats().await?;
        if stats.total_bytes > self.config.quota_warning_bytes {
            Ok(Some(format!(
                "Job storage uses {} bytes, over the {} byte budget",
                stats.total_bytes, self.config.quota_warning_bytes
            )))
        } else {
            Ok(None)
        }
    }

    /// Flush all pending debounced writes; used at shutdown
    pub async fn flush(&self) {
        self.writer.flush_all().await;
    }
}

/// Best-effort mapping of a legacy organizer state blob into a snapshot.
/// Jobs caught mid-flight come back paused so they can be resumed.
fn legacy_state_to_snapshot(raw: &Value, now_millis: i64) -> Option<JobSnapshot> {
    let job_id = raw.get("jobId")?.as_str()?.to_string();
    let stage = raw
        .get("stage")
        .and_then(|v| v.as_str())
        .unwrap_or("organize")
        .to_string();
    let status = match raw.get("status").and_then(|v| v.as_str())? {
        "completed" => JobStatus::Completed,
        "cancelled" => JobStatus::Cancelled,
        "failed" => JobStatus::Failed,
        "paused" | "running" | "queued" => JobStatus::Paused,
        _ => return None,
    };
    let percent = raw
        .get("progress")
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
        .min(100) as u8;
    let message = raw
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("Migrated from legacy state")
        .to_string();
    let timestamp = raw
        .get("updatedAt")
        .and_then(|v| v.as_i64())
        .unwrap_or(now_millis);

    let mut snapshot = JobSnapshot::new(
        job_id,
        "library_maintenance",
        timestamp.max(1),
        vec![stage.clone()],
        std::collections::BTreeMap::from([(stage, 100u32)]),
        Default::default(),
    )
    .ok()?;
    snapshot.status = status;
    snapshot.weighted_percent = percent;
    snapshot.activity = message;
    snapshot.validate().ok()?;
    Some(snapshot)
}

fn legacy_activity_entries(raw: &Value) -> Vec<ActivityEntry> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let message = item.get("message")?.as_str()?.to_string();
            let timestamp = item.get("timestamp")?.as_i64()?;
            let job_id = item
                .get("jobId")
                .and_then(|v| v.as_str())
                .unwrap_or("legacy")
                .to_string();
            let entry = ActivityEntry::new(
                job_id,
                timestamp,
                crate::domain::ActivityLevel::Info,
                message,
            );
            entry.validate().ok()?;
            Some(entry)
        })
        .collect()
}
