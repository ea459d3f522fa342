use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::configuration::types::{FileConfig, PortConfig};
use crate::container_management::supervisor::ContainerSupervisor;
use crate::container_management::types::ContainerBinding;
use crate::error_handling::types::SessionError;
use crate::file_management::command_tracker::triggers_refresh;
use crate::file_management::file_bridge;
use crate::file_management::file_tree::TreeBuilder;
use crate::file_management::types::EntryKind;
use crate::port_management::port_allocator::PortAllocator;
use crate::port_management::port_detector::PortDetector;
use crate::port_management::types::PortInfo;
use crate::session_management::connection_registry::{ConnectionRegistry, Outbound};
use crate::session_management::messages::{
    ChangeFile, ClientEvent, CloseTerminal, CreateTerminal, ServerEvent, WriteTerminal,
};
use crate::session_management::session::UserSession;
use crate::session_management::ConnectionState;
use crate::storage::types::UserId;
use crate::terminal_management::multiplexer::TerminalMultiplexer;
use crate::terminal_management::types::{ConnectionId, TerminalEvent, DEFAULT_TERMINAL_ID};

/// Drives every real-time connection from provisioning to teardown.
///
/// # Fields Overview
///
/// - `supervisor`: resolves or creates the user's container
/// - `ports` / `detector`: port range bookkeeping and listener polling
/// - `terminals`: the per-connection shells
/// - `trees`: workspace tree snapshots read from the container
/// - `registry`: live connections and their outbound channels
///
/// Connections are keyed by [`ConnectionId`]; containers, ports and workspaces by
/// the stable [`UserId`]. Several connections of one user share one container.
pub struct SessionOrchestrator {
    supervisor: Arc<ContainerSupervisor>,
    ports: Arc<PortAllocator>,
    detector: PortDetector,
    terminals: Arc<TerminalMultiplexer>,
    trees: TreeBuilder,
    registry: Arc<ConnectionRegistry>,
    port_config: PortConfig,
    file_config: FileConfig,
}

impl SessionOrchestrator {
    pub fn new(
        supervisor: Arc<ContainerSupervisor>,
        ports: Arc<PortAllocator>,
        detector: PortDetector,
        terminals: Arc<TerminalMultiplexer>,
        trees: TreeBuilder,
        port_config: PortConfig,
        file_config: FileConfig,
    ) -> Self {
        Self {
            supervisor,
            ports,
            detector,
            terminals,
            trees,
            registry: Arc::new(ConnectionRegistry::new()),
            port_config,
            file_config,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.registry.count()
    }

    pub fn session(&self, connection_id: &ConnectionId) -> Option<UserSession> {
        self.registry.session(connection_id)
    }

    /// Accepts an authenticated connection and brings it to the active state.
    ///
    /// Provisioning failures are reported on the default terminal's data stream and
    /// leave the connection open without a container.
    pub async fn connect(self: &Arc<Self>, user_id: UserId, outbound: Outbound) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        info!("User {} connected (connection {})", user_id, connection_id);

        self.registry
            .register(UserSession::new(connection_id.clone(), user_id.clone()), outbound);
        self.registry
            .set_state(&connection_id, ConnectionState::Authenticating);

        let registry = self.registry.clone();
        let sink_id = connection_id.clone();
        self.terminals.open(
            &connection_id,
            Arc::new(move |event: TerminalEvent| {
                if let TerminalEvent::Closed { terminal_id } = &event {
                    registry.forget_terminal(&sink_id, terminal_id);
                }
                registry.send(&sink_id, event.into());
            }),
        );

        let binding = match self.supervisor.ensure_container(&user_id).await {
            Ok(binding) => binding,
            Err(e) => {
                error!("Error setting up session for user {}: {}", user_id, e);
                self.registry.send(
                    &connection_id,
                    ServerEvent::TerminalData {
                        terminal_id: DEFAULT_TERMINAL_ID.to_string(),
                        data: format!("\r\n❌ Error: {}\r\n", e),
                    },
                );
                return connection_id;
            }
        };

        if !self.registry.bind_container(&connection_id, &binding) {
            debug!("Connection {} left during provisioning", connection_id);
            return connection_id;
        }
        self.registry
            .set_state(&connection_id, ConnectionState::ContainerReady);

        if let Err(e) = self
            .terminals
            .spawn(&binding.container_name, &connection_id, Some(DEFAULT_TERMINAL_ID))
            .await
        {
            error!(
                "Failed to spawn default terminal for connection {}: {}",
                connection_id, e
            );
            self.registry.send(
                &connection_id,
                ServerEvent::TerminalError {
                    terminal_id: Some(DEFAULT_TERMINAL_ID.to_string()),
                    error: e.to_string(),
                },
            );
        }

        self.start_port_poll(&connection_id, &user_id, &binding.container_name);
        self.send_tree(&connection_id, &binding.container_name).await;
        self.registry.send(
            &connection_id,
            ServerEvent::TerminalList {
                terminals: self.terminals.list(&connection_id).await,
            },
        );

        self.registry
            .set_state(&connection_id, ConnectionState::Active);
        info!(
            "User {} session setup complete (connection {}, container {})",
            user_id, connection_id, binding.container_name
        );
        connection_id
    }

    fn start_port_poll(self: &Arc<Self>, connection_id: &ConnectionId, user_id: &UserId, container_name: &str) {
        let this = Arc::clone(self);
        let connection = connection_id.clone();
        let user = user_id.clone();
        let container = container_name.to_string();
        let initial_delay = Duration::from_millis(self.port_config.initial_poll_delay_ms);
        let period = Duration::from_secs(self.port_config.poll_interval_secs);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                this.poll_ports(&connection, &user, &container).await;
            }
        });

        if let Err(handle) = self.registry.set_port_poll(connection_id, handle) {
            handle.abort();
        }
    }

    /// One detection pass: read the listener table, remap, push `ports:update`.
    /// Failures are logged and skipped until the next tick.
    async fn poll_ports(&self, connection_id: &ConnectionId, user_id: &UserId, container_name: &str) {
        let observed = match self.detector.detect(container_name).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Port detection error for {}: {}", container_name, e);
                return;
            }
        };
        if let Err(e) = self.ports.map_ports(user_id, &observed).await {
            warn!("Port mapping error for user {}: {}", user_id, e);
            return;
        }
        if let Some(info) = self.ports.port_info(user_id).await {
            self.registry
                .send(connection_id, ServerEvent::PortsUpdate(info));
        }
    }

    /// Routes one client frame. Keystrokes, resizes and file saves are applied in
    /// arrival order; everything else runs on its own task so a slow operation never
    /// holds up typing.
    pub async fn handle_event(self: &Arc<Self>, connection_id: &ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::TerminalWrite(request) => self.write_terminal(connection_id, request).await,
            ClientEvent::TerminalResize(request) => {
                self.terminals
                    .resize(connection_id, &request.terminal_id, request.cols, request.rows)
                    .await
            }
            ClientEvent::FileChange(request) => self.change_file(connection_id, request).await,
            other => {
                let this = Arc::clone(self);
                let connection_id = connection_id.clone();
                tokio::spawn(async move { this.dispatch(&connection_id, other).await });
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, connection_id: &ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::TerminalCreate(request) => self.create_terminal(connection_id, request).await,
            ClientEvent::TerminalClose(request) => self.close_terminal(connection_id, request).await,
            ClientEvent::TerminalList => {
                let terminals = self.terminals.list(connection_id).await;
                self.registry
                    .send(connection_id, ServerEvent::TerminalList { terminals });
            }
            ClientEvent::FileChange(request) => self.change_file(connection_id, request).await,
            ClientEvent::FileTreeRefresh => {
                if let Some(binding) = self.binding(connection_id) {
                    self.send_tree(connection_id, &binding.container_name).await;
                }
            }
            ClientEvent::TerminalWrite(request) => self.write_terminal(connection_id, request).await,
            ClientEvent::TerminalResize(request) => {
                self.terminals
                    .resize(connection_id, &request.terminal_id, request.cols, request.rows)
                    .await
            }
        }
    }

    fn binding(&self, connection_id: &ConnectionId) -> Option<ContainerBinding> {
        self.registry
            .session(connection_id)
            .and_then(|s| s.binding())
    }

    async fn write_terminal(self: &Arc<Self>, connection_id: &ConnectionId, request: WriteTerminal) {
        if !self
            .terminals
            .write(connection_id, &request.terminal_id, request.input.as_bytes())
            .await
        {
            return;
        }

        let commands = self
            .registry
            .track_input(connection_id, &request.terminal_id, &request.input);
        let refresh = commands
            .iter()
            .any(|c| triggers_refresh(c, &self.file_config.refresh_commands));
        if refresh {
            if let Some(binding) = self.binding(connection_id) {
                self.schedule_tree_refresh(connection_id, binding.container_name);
            }
        }
    }

    fn schedule_tree_refresh(self: &Arc<Self>, connection_id: &ConnectionId, container_name: String) {
        let this = Arc::clone(self);
        let connection_id = connection_id.clone();
        let delay = Duration::from_millis(self.file_config.refresh_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.send_tree(&connection_id, &container_name).await;
        });
    }

    async fn send_tree(&self, connection_id: &ConnectionId, container_name: &str) {
        match self.trees.build_tree(container_name).await {
            Ok(tree) => {
                self.registry
                    .send(connection_id, ServerEvent::FileRefresh(tree));
            }
            Err(e) => warn!("Skipping file tree refresh for {}: {}", connection_id, e),
        }
    }

    async fn create_terminal(&self, connection_id: &ConnectionId, request: CreateTerminal) {
        let Some(binding) = self.binding(connection_id) else {
            self.registry.send(
                connection_id,
                ServerEvent::TerminalError {
                    terminal_id: request.terminal_id,
                    error: "Container is not ready".to_string(),
                },
            );
            return;
        };

        let event = match self
            .terminals
            .spawn(&binding.container_name, connection_id, request.terminal_id.as_deref())
            .await
        {
            Ok(summary) => ServerEvent::TerminalCreated {
                terminal_id: summary.id,
            },
            Err(e) => {
                warn!("Error creating terminal for {}: {}", connection_id, e);
                ServerEvent::TerminalError {
                    terminal_id: request.terminal_id,
                    error: e.to_string(),
                }
            }
        };
        self.registry.send(connection_id, event);
    }

    async fn close_terminal(&self, connection_id: &ConnectionId, request: CloseTerminal) {
        match self.terminals.close(connection_id, &request.terminal_id).await {
            Ok(true) => {
                self.registry
                    .forget_terminal(connection_id, &request.terminal_id);
                self.registry.send(
                    connection_id,
                    ServerEvent::TerminalClosed {
                        terminal_id: request.terminal_id,
                    },
                );
            }
            Ok(false) => debug!(
                "Close of unknown terminal {} on {} ignored",
                request.terminal_id, connection_id
            ),
            Err(e) => {
                self.registry.send(
                    connection_id,
                    ServerEvent::TerminalError {
                        terminal_id: Some(request.terminal_id),
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    async fn change_file(&self, connection_id: &ConnectionId, request: ChangeFile) {
        let Some(binding) = self.binding(connection_id) else {
            return;
        };
        if let Err(e) =
            file_bridge::write_file(&binding.workspace_dir, &request.path, &request.content).await
        {
            warn!("Error saving {} for {}: {}", request.path, connection_id, e);
        }
    }

    /// Tears a connection down. Terminals die; the container and its port range stay.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        let Some(closed) = self.registry.remove(connection_id) else {
            return;
        };
        if let Some(poll) = closed.port_poll {
            poll.abort();
        }

        let mut session = closed.session;
        let terminals = self.terminals.close_all(connection_id).await;
        if let Err(e) = self.ports.clear_active_ports(&session.user_id).await {
            warn!("Could not clear active ports of user {}: {}", session.user_id, e);
        }
        session.state = ConnectionState::Disconnected;

        info!(
            "Connection {} of user {} {:?}: closed {} terminal(s), container {} kept for reuse",
            connection_id,
            session.user_id,
            session.state,
            terminals,
            session.container_name.as_deref().unwrap_or("-")
        );
    }

    /// Container binding of any ready connection of the user. File endpoints act on it.
    pub fn workspace_for(&self, user_id: &UserId) -> Result<ContainerBinding, SessionError> {
        self.registry
            .ready_session_for(user_id)
            .and_then(|s| s.binding())
            .ok_or_else(|| SessionError::NotActive(user_id.to_string()))
    }

    /// Rebuilds the user's tree once and pushes it to all of their connections.
    pub async fn broadcast_tree(&self, user_id: &UserId) -> usize {
        let Ok(binding) = self.workspace_for(user_id) else {
            return 0;
        };
        match self.trees.build_tree(&binding.container_name).await {
            Ok(tree) => self
                .registry
                .broadcast(user_id, &ServerEvent::FileRefresh(tree)),
            Err(e) => {
                warn!("Skipping file tree broadcast for user {}: {}", user_id, e);
                0
            }
        }
    }

    pub async fn read_file(&self, user_id: &UserId, path: &str) -> Result<String, SessionError> {
        let binding = self.workspace_for(user_id)?;
        Ok(file_bridge::read_file(&binding.workspace_dir, path).await?)
    }

    pub async fn create_entry(&self, user_id: &UserId, path: &str, kind: EntryKind) -> Result<(), SessionError> {
        let binding = self.workspace_for(user_id)?;
        file_bridge::create(&binding.workspace_dir, path, kind).await?;
        self.broadcast_tree(user_id).await;
        Ok(())
    }

    pub async fn delete_entry(&self, user_id: &UserId, path: &str) -> Result<(), SessionError> {
        let binding = self.workspace_for(user_id)?;
        file_bridge::delete(&binding.workspace_dir, path).await?;
        self.broadcast_tree(user_id).await;
        Ok(())
    }

    pub async fn rename_entry(&self, user_id: &UserId, old: &str, new: &str) -> Result<(), SessionError> {
        let binding = self.workspace_for(user_id)?;
        file_bridge::rename(&binding.workspace_dir, old, new).await?;
        self.broadcast_tree(user_id).await;
        Ok(())
    }

    pub async fn port_info(&self, user_id: &UserId) -> Option<PortInfo> {
        self.ports.port_info(user_id).await
    }

    pub async fn container_stats(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.supervisor.resource_summary().await?)
    }
}
