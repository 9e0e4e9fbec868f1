//! JSON-RPC Server
//!
//! Exposes the job control surface over JSON-RPC 2.0 on localhost TCP.

use crate::handler::RpcHandler;
use crate::types::{ActivityRequest, ControlRequest, StartRequest, StatusRequest, StorageRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use linkward_core::application::JobSystem;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9419;

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, system: Arc<JobSystem>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(system)),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Security: only binds to 127.0.0.1 (no external access)
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP (localhost only)"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("job.start.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StartRequest = params.parse()?;
                    handler.start(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.pause.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ControlRequest = params.parse()?;
                    handler.pause(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.resume.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ControlRequest = params.parse()?;
                    handler.resume(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.cancel.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ControlRequest = params.parse()?;
                    handler.cancel(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatusRequest = params.parse()?;
                    handler.status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.activity.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ActivityRequest = params.parse()?;
                    handler.activity(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.storage.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StorageRequest = params.parse()?;
                    handler.storage(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!("JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok(handle)
    }
}
