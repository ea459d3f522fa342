use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::configuration::config::Config;
use crate::container_management::runtime::{ContainerRuntime, DockerRuntime};
use crate::container_management::supervisor::ContainerSupervisor;
use crate::error_handling::types::*;
use crate::file_management::file_tree::TreeBuilder;
use crate::port_management::port_allocator::PortAllocator;
use crate::port_management::port_detector::PortDetector;
use crate::session_management::session_orchestrator::SessionOrchestrator;
use crate::storage::file_storage::JsonFileStore;
use crate::storage::user_records::UserRecordTable;
use crate::terminal_management::multiplexer::TerminalMultiplexer;
use crate::terminal_management::process::{launcher_for, ProcessLauncher};
use crate::web_interface::auth::TokenVerifier;
use crate::web_interface::web_server::WebServer;

/// Owns every subsystem and drives the service lifecycle.
///
/// # Fields Overview
///
/// - `config`: validated configuration the subsystems were built from
/// - `supervisor`: container lifecycle, used for startup reconciliation and pruning
/// - `orchestrator`: per-connection session logic shared with the web server
/// - `web_server`: websocket and HTTP front
pub struct Controller {
    pub config: Config,
    supervisor: Arc<ContainerSupervisor>,
    orchestrator: Arc<SessionOrchestrator>,
    web_server: WebServer,
}

impl Controller {
    /// Builds the service on the docker CLI, failing early when the daemon is unreachable.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let docker = DockerRuntime::new(config.container.runtime_binary.clone());
        docker.check_available().await.map_err(|e| {
            error!("Container runtime check failed: {}", e);
            ControllerError::from(e)
        })?;

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);
        let launcher = launcher_for(config.terminal.mode, runtime.clone());
        Self::with_runtime(config, runtime, launcher).await
    }

    pub async fn with_runtime(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, ControllerError> {
        let store = JsonFileStore::new(&config.storage.records_file)?;
        let records = Arc::new(UserRecordTable::load(Arc::new(store))?);

        let ports = Arc::new(
            PortAllocator::new(
                records.clone(),
                config.ports.clone(),
                config.server.public_host.clone(),
            )
            .await,
        );
        let supervisor = Arc::new(ContainerSupervisor::new(
            runtime.clone(),
            records,
            ports.clone(),
            config.container.clone(),
        ));

        let terminals = Arc::new(TerminalMultiplexer::new(
            launcher,
            config.terminal.clone(),
            config.container.workspace_mount.clone(),
        ));
        let detector = PortDetector::new(
            runtime.clone(),
            Duration::from_secs(config.ports.detection_timeout_secs),
            config.ports.min_detected_port,
        );
        let trees = TreeBuilder::new(
            runtime,
            config.container.workspace_mount.clone(),
            config.files.excluded_dirs.clone(),
            Duration::from_secs(config.files.tree_timeout_secs),
        );

        let orchestrator = Arc::new(SessionOrchestrator::new(
            supervisor.clone(),
            ports,
            detector,
            terminals,
            trees,
            config.ports.clone(),
            config.files.clone(),
        ));

        let verifier = Arc::new(TokenVerifier::new(
            &config.auth.access_token_secret,
            config.auth.cookie_name.clone(),
        ));
        let web_server = WebServer::new(orchestrator.clone(), verifier, config.server.clone());

        Ok(Self {
            config,
            supervisor,
            orchestrator,
            web_server,
        })
    }

    pub fn orchestrator(&self) -> Arc<SessionOrchestrator> {
        self.orchestrator.clone()
    }

    /// Drops persisted entries whose container no longer exists. Returns how many went.
    pub async fn reconcile(&self) -> usize {
        let removed = self.supervisor.cleanup_stale_entries().await;
        info!("Startup reconciliation removed {} stale entr(ies)", removed);
        removed
    }

    fn spawn_prune_task(&self) -> Option<JoinHandle<()>> {
        self.config.container.prune_stopped_after_secs?;
        let supervisor = self.supervisor.clone();
        let period = Duration::from_secs(self.config.container.prune_interval_secs.max(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = supervisor.prune_stopped().await {
                    warn!("Pruning stopped containers failed: {}", e);
                }
            }
        }))
    }

    /// Reconciles state, then serves until the web server stops or ctrl-c arrives.
    pub async fn run(&self) -> Result<(), ControllerError> {
        self.reconcile().await;
        let prune = self.spawn_prune_task();

        let result = tokio::select! {
            served = self.web_server.start() => served.map_err(ControllerError::from),
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!("Could not listen for shutdown signal: {}", e),
                }
                Ok(())
            }
        };

        if let Some(prune) = prune {
            prune.abort();
        }
        info!(
            "Shutting down with {} active connection(s); containers are kept",
            self.orchestrator.active_connections()
        );
        result
    }
}
