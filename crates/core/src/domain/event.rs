// Bus Event Vocabulary

use crate::domain::activity::ActivityEntry;
use crate::domain::command::JobCommand;
use crate::domain::snapshot::JobSnapshot;
use serde::{Deserialize, Serialize};

/// The unit published on the job bus.
///
/// Events are not an ordered log; only the latest status-class event is
/// kept for replay to late-joining observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Full snapshot after a state transition
    #[serde(rename = "jobStatus")]
    Status { job: JobSnapshot },

    /// Incremental unit update for the in-progress stage
    #[serde(rename = "stageProgress")]
    StageProgress {
        stage: String,
        processed: u64,
        total: Option<u64>,
        job: JobSnapshot,
    },

    /// One activity log line
    #[serde(rename = "jobActivity")]
    Activity { activity: ActivityEntry },

    /// A named channel connected
    #[serde(rename = "jobConnected")]
    Connected {
        #[serde(rename = "portName")]
        port_name: String,
    },

    /// A named channel disconnected
    #[serde(rename = "jobDisconnected")]
    Disconnected {
        #[serde(rename = "portName")]
        port_name: String,
    },

    /// A command relayed over a channel acting as a command source
    #[serde(rename = "jobCommand")]
    Command { command: JobCommand },
}

impl JobEvent {
    /// Status-class events feed the durable fallback record and replay
    pub fn is_status_class(&self) -> bool {
        matches!(self, JobEvent::Status { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Status { .. } => "jobStatus",
            JobEvent::StageProgress { .. } => "stageProgress",
            JobEvent::Activity { .. } => "jobActivity",
            JobEvent::Connected { .. } => "jobConnected",
            JobEvent::Disconnected { .. } => "jobDisconnected",
            JobEvent::Command { .. } => "jobCommand",
        }
    }
}
