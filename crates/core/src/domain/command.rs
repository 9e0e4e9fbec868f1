// Command Vocabulary - request/response surface consumed by UI and scheduler

use crate::domain::activity::ActivityEntry;
use crate::domain::snapshot::JobSnapshot;
use serde::{Deserialize, Serialize};

/// Commands accepted by the job system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum JobCommand {
    #[serde(rename = "START_JOB")]
    StartJob {
        #[serde(rename = "requestedBy")]
        requested_by: String,
        #[serde(default)]
        schedule: Option<String>,
    },

    #[serde(rename = "PAUSE_JOB")]
    PauseJob,

    #[serde(rename = "RESUME_JOB")]
    ResumeJob,

    #[serde(rename = "CANCEL_JOB")]
    CancelJob,

    #[serde(rename = "GET_JOB_STATUS")]
    GetJobStatus,

    #[serde(rename = "GET_ACTIVITY_LOG")]
    GetActivityLog {
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// Structured synchronous result of a command.
///
/// Commands never panic or error across this boundary; failures come back
/// as `success: false` with a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<JobSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Vec<ActivityEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            job_id: None,
            snapshot: None,
            activity: None,
            error: None,
        }
    }

    pub fn started(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::ok()
        }
    }

    pub fn with_snapshot(snapshot: Option<JobSnapshot>) -> Self {
        Self {
            snapshot,
            ..Self::ok()
        }
    }

    pub fn with_activity(activity: Vec<ActivityEntry>) -> Self {
        Self {
            activity: Some(activity),
            ..Self::ok()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            job_id: None,
            snapshot: None,
            activity: None,
            error: Some(message.into()),
        }
    }
}
