use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::TokenVerifier;
use super::routes::*;
use crate::configuration::types::ServerConfig;
use crate::error_handling::types::WebError;
use crate::session_management::session_orchestrator::SessionOrchestrator;

use warp::Filter;

/// HTTP and websocket front of the service.
pub struct WebServer {
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
    config: ServerConfig,
}

impl WebServer {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        verifier: Arc<TokenVerifier>,
        config: ServerConfig,
    ) -> Self {
        Self {
            orchestrator,
            verifier,
            config,
        }
    }

    pub fn address(&self) -> Result<SocketAddr, WebError> {
        format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| {
                error!(
                    "Invalid listen address {}:{}: {}",
                    self.config.bind_address, self.config.port, e
                );
                WebError::BindFailed(format!("{}:{}", self.config.bind_address, self.config.port))
            })
    }

    /// Serves until the process stops.
    pub async fn start(&self) -> Result<(), WebError> {
        let addr = self.address()?;
        let orchestrator = self.orchestrator.clone();
        let verifier = self.verifier.clone();

        let cors = warp::cors()
            .allow_origin(self.config.allowed_origin.as_str())
            .allow_credentials(true)
            .allow_methods(vec!["GET", "POST", "OPTIONS"])
            .allow_headers(vec!["content-type", "authorization"]);

        let routes = ws_route(orchestrator.clone(), verifier.clone())
            .or(file_content_route(orchestrator.clone(), verifier.clone()))
            .or(create_route(orchestrator.clone(), verifier.clone()))
            .or(delete_route(orchestrator.clone(), verifier.clone()))
            .or(rename_route(orchestrator.clone(), verifier.clone()))
            .or(ports_route(orchestrator.clone(), verifier.clone()))
            .or(stats_route(orchestrator.clone(), verifier))
            .or(health_route(orchestrator))
            .recover(handle_rejection)
            .with(cors);

        info!("Web server listening on {}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}
