// Activity Log Entry

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Severity of one activity line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityLevel::Info => write!(f, "info"),
            ActivityLevel::Warn => write!(f, "warn"),
            ActivityLevel::Error => write!(f, "error"),
        }
    }
}

/// One append-only log line attached to a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub job_id: String,
    pub timestamp: i64,
    pub level: ActivityLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ActivityEntry {
    pub fn new(
        job_id: impl Into<String>,
        timestamp: i64,
        level: ActivityLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            timestamp,
            level,
            message: message.into(),
            stage: None,
            context: None,
        }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Entries failing validation are dropped rather than stored
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(DomainError::ValidationError(
                "activity entry missing job id".to_string(),
            ));
        }
        if self.message.is_empty() {
            return Err(DomainError::ValidationError(
                "activity entry missing message".to_string(),
            ));
        }
        if self.timestamp <= 0 {
            return Err(DomainError::ValidationError(
                "activity entry missing timestamp".to_string(),
            ));
        }
        Ok(())
    }
}
