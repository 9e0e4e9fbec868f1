//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use linkward_core::domain::{ActivityEntry, JobSnapshot};
use serde::{Deserialize, Serialize};

/// job.start.v1 - Start (or rehydrate) the maintenance job
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default = "default_requested_by")]
    pub requested_by: String,
    #[serde(default)]
    pub schedule: Option<String>,
}

fn default_requested_by() -> String {
    "rpc".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub job_id: String,
    pub status: String,
}

/// job.pause.v1 / job.resume.v1 / job.cancel.v1 - no parameters
#[derive(Debug, Deserialize)]
pub struct ControlRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub accepted: bool,
}

/// job.status.v1 - Current snapshot, if any
#[derive(Debug, Deserialize)]
pub struct StatusRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub snapshot: Option<JobSnapshot>,
}

/// job.activity.v1 - Recent activity log
#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityResponse {
    pub entries: Vec<ActivityEntry>,
}

/// admin.storage.v1 - Byte usage per storage bucket
#[derive(Debug, Deserialize)]
pub struct StorageRequest {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResponse {
    pub snapshot_bytes: u64,
    pub activity_bytes: u64,
    pub history_bytes: u64,
    pub last_event_bytes: u64,
    pub total_bytes: u64,
    pub quota_warning: Option<String>,
}
