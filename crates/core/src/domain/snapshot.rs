// Job Snapshot - the single authoritative record of the active job
//
// Field names serialize in camelCase because the snapshot doubles as the
// durable schema read by UI observers.

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Job ID (UUID v4, opaque)
pub type JobId = String;

/// Job lifecycle status
///
/// `idle` is implicit: no persisted snapshot exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses move the snapshot into history and clear the slot
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Statuses from which a pause command is accepted
    pub fn is_pausable(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Queued)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Cancelling => write!(f, "cancelling"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Unit counts for the stage currently executing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUnits {
    pub processed: u64,
    pub total: Option<u64>,
}

/// Who asked for the job, and when
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMeta {
    pub requested_by: String,
    pub requested_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// The authoritative record of the one active (or most recently active) job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub job_type: String,
    pub status: JobStatus,

    /// Current stage id and its position in `stage_order`
    pub stage: String,
    pub stage_index: usize,
    pub stage_units: StageUnits,

    /// Overall progress, 0-100
    pub weighted_percent: u8,
    /// True while the current stage total is unknown or zero
    pub indeterminate: bool,

    /// Latest human-readable status line
    pub activity: String,

    pub timestamp: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// Business-level counters, shallow-merged as stages complete
    #[serde(default)]
    pub summary: serde_json::Map<String, serde_json::Value>,

    /// Last fatal message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub queue_meta: QueueMeta,

    /// Captured at job creation so the plan stays consistent even if
    /// defaults change while the job is paused
    pub stage_order: Vec<String>,
    pub stage_weights: BTreeMap<String, u32>,
}

impl JobSnapshot {
    /// Create a fresh snapshot at the first stage of a plan
    pub fn new(
        job_id: impl Into<String>,
        job_type: impl Into<String>,
        now_millis: i64,
        stage_order: Vec<String>,
        stage_weights: BTreeMap<String, u32>,
        queue_meta: QueueMeta,
    ) -> Result<Self> {
        let first_stage = stage_order
            .first()
            .cloned()
            .ok_or_else(|| DomainError::ValidationError("empty stage order".to_string()))?;

        Ok(Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            status: JobStatus::Queued,
            stage: first_stage,
            stage_index: 0,
            stage_units: StageUnits::default(),
            weighted_percent: 0,
            indeterminate: true,
            activity: "Job queued".to_string(),
            timestamp: now_millis,
            created_at: now_millis,
            started_at: None,
            completed_at: None,
            summary: serde_json::Map::new(),
            error: None,
            queue_meta,
            stage_order,
            stage_weights,
        })
    }

    /// Structural validation applied on every save and load
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(DomainError::ValidationError("empty job id".to_string()));
        }
        if self.stage.is_empty() {
            return Err(DomainError::ValidationError("empty stage id".to_string()));
        }
        if self.stage_order.is_empty() {
            return Err(DomainError::ValidationError(
                "empty stage order".to_string(),
            ));
        }
        if self.stage_index > self.stage_order.len() {
            return Err(DomainError::ValidationError(format!(
                "stage index {} out of range for {} stages",
                self.stage_index,
                self.stage_order.len()
            )));
        }
        if self.weighted_percent > 100 {
            return Err(DomainError::ValidationError(format!(
                "weighted percent {} out of range",
                self.weighted_percent
            )));
        }
        if self.timestamp <= 0 || self.created_at <= 0 {
            return Err(DomainError::ValidationError(
                "missing timestamps".to_string(),
            ));
        }
        Ok(())
    }

    /// Guarded transition into `running` when a stage begins
    pub fn begin_stage(&mut self, stage: &str, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "running".to_string(),
            });
        }
        self.stage = stage.to_string();
        self.status = JobStatus::Running;
        self.stage_units = StageUnits::default();
        self.indeterminate = true;
        self.timestamp = now_millis;
        if self.started_at.is_none() {
            self.started_at = Some(now_millis);
        }
        Ok(())
    }

    /// Shallow-merge business counters, later keys win
    pub fn merge_summary(&mut self, extra: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in extra {
            self.summary.insert(key.clone(), value.clone());
        }
    }
}

/// Archived copy of a terminal snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub snapshot: JobSnapshot,
    pub history_timestamp: i64,
}
