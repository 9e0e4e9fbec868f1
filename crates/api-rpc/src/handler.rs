//! RPC Method Handlers
//!
//! Bridges each JSON-RPC method onto the job system's command surface.

use crate::error::{command_rejected, throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    ActivityRequest, ActivityResponse, ControlRequest, ControlResponse, StartRequest,
    StartResponse, StatusRequest, StatusResponse, StorageRequest, StorageResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use linkward_core::application::JobSystem;
use linkward_core::domain::{CommandResponse, JobCommand};
use std::sync::Arc;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    system: Arc<JobSystem>,
    rate_limiter: RateLimiter,
}

impl RpcHandler {
    pub fn new(system: Arc<JobSystem>) -> Self {
        // Default: 50 burst, 20 req/sec (configurable via env)
        let max_burst: u32 = std::env::var("LINKWARD_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);

        let rate_per_sec: u32 = std::env::var("LINKWARD_RATE_LIMIT_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        Self {
            system,
            rate_limiter: RateLimiter::new(max_burst, rate_per_sec),
        }
    }

    /// job.start.v1
    pub async fn start(&self, params: StartRequest) -> Result<StartResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let response = self
            .system
            .handle_command(JobCommand::StartJob {
                requested_by: params.requested_by,
                schedule: params.schedule,
            })
            .await;
        let job_id = require_success(response)?
            .job_id
            .unwrap_or_default();
        Ok(StartResponse {
            job_id,
            status: "queued".to_string(),
        })
    }

    /// job.pause.v1
    pub async fn pause(&self, _params: ControlRequest) -> Result<ControlResponse, ErrorObjectOwned> {
        self.control(JobCommand::PauseJob).await
    }

    /// job.resume.v1
    pub async fn resume(
        &self,
        _params: ControlRequest,
    ) -> Result<ControlResponse, ErrorObjectOwned> {
        self.control(JobCommand::ResumeJob).await
    }

    /// job.cancel.v1
    pub async fn cancel(
        &self,
        _params: ControlRequest,
    ) -> Result<ControlResponse, ErrorObjectOwned> {
        self.control(JobCommand::CancelJob).await
    }

    async fn control(&self, command: JobCommand) -> Result<ControlResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }
        require_success(self.system.handle_command(command).await)?;
        Ok(ControlResponse { accepted: true })
    }

    /// job.status.v1
    pub async fn status(&self, _params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let response = require_success(self.system.handle_command(JobCommand::GetJobStatus).await)?;
        Ok(StatusResponse {
            snapshot: response.snapshot,
        })
    }

    /// job.activity.v1
    pub async fn activity(
        &self,
        params: ActivityRequest,
    ) -> Result<ActivityResponse, ErrorObjectOwned> {
        let response = require_success(
            self.system
                .handle_command(JobCommand::GetActivityLog {
                    limit: params.limit,
                })
                .await,
        )?;
        Ok(ActivityResponse {
            entries: response.activity.unwrap_or_default(),
        })
    }

    /// admin.storage.v1
    pub async fn storage(
        &self,
        _params: StorageRequest,
    ) -> Result<StorageResponse, ErrorObjectOwned> {
        let stats = self
            .system
            .store()
            .storage_stats()
            .await
            .map_err(to_rpc_error)?;
        let quota_warning = self
            .system
            .store()
            .check_quota_warning()
            .await
            .map_err(to_rpc_error)?;
        Ok(StorageResponse {
            snapshot_bytes: stats.snapshot_bytes,
            activity_bytes: stats.activity_bytes,
            history_bytes: stats.history_bytes,
            last_event_bytes: stats.last_event_bytes,
            total_bytes: stats.total_bytes,
            quota_warning,
        })
    }
}

fn require_success(response: CommandResponse) -> Result<CommandResponse, ErrorObjectOwned> {
    if response.success {
        Ok(response)
    } else {
        Err(command_rejected(
            response
                .error
                .unwrap_or_else(|| "Command rejected".to_string()),
        ))
    }
}
