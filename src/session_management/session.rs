use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::container_management::types::ContainerBinding;
use crate::session_management::ConnectionState;
use crate::storage::types::UserId;
use crate::terminal_management::types::ConnectionId;

/// One authenticated real-time connection.
///
/// # Fields Overview
///
/// - `connection_id`: ephemeral id of the socket, keys the terminal table
/// - `user_id`: stable id from the access token, keys containers and ports
/// - `container_name` / `workspace_dir`: set once the container is ready
/// - `state`: position in the connection lifecycle
///
/// The session does not own the container; dropping it leaves the container running.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub container_name: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
}

impl UserSession {
    pub fn new(connection_id: ConnectionId, user_id: UserId) -> Self {
        Self {
            connection_id,
            user_id,
            container_name: None,
            workspace_dir: None,
            state: ConnectionState::Connecting,
            connected_at: Utc::now(),
        }
    }

    pub fn bind(&mut self, binding: &ContainerBinding) {
        self.container_name = Some(binding.container_name.clone());
        self.workspace_dir = Some(binding.workspace_dir.clone());
    }

    /// Container and workspace, once provisioning succeeded.
    pub fn binding(&self) -> Option<ContainerBinding> {
        match (&self.container_name, &self.workspace_dir) {
            (Some(name), Some(dir)) => Some(ContainerBinding {
                container_name: name.clone(),
                workspace_dir: dir.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }
}
