//! Core types used by the container management subsystem.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::configuration::types::ContainerConfig;
use crate::storage::types::PortRange;

/// Aggregate counters describing what the supervisor has done since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    /// Containers created from scratch.
    pub total_created: u64,
    /// Connections served by an existing recorded container.
    pub total_reused: u64,
    /// Containers found in the runtime without a record and taken over.
    pub total_adopted: u64,
    /// Provisioning attempts that failed.
    pub failed_count: u64,
}

/// Where a user's container lives. Returned by `ensure_container`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBinding {
    pub container_name: String,
    /// Absolute host path bind-mounted as the container workspace.
    pub workspace_dir: PathBuf,
}

/// Everything needed to launch one user container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub workspace_dir: PathBuf,
    pub workspace_mount: String,
    pub port_range: PortRange,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub pids_limit: u32,
    pub network: String,
    pub environment: Vec<String>,
}

impl ContainerSpec {
    pub fn from_config(
        config: &ContainerConfig,
        name: &str,
        workspace_dir: &Path,
        port_range: PortRange,
    ) -> Self {
        ContainerSpec {
            name: name.to_string(),
            image: config.image.clone(),
            workspace_dir: workspace_dir.to_path_buf(),
            workspace_mount: config.workspace_mount.clone(),
            port_range,
            memory_limit: config.memory_limit.clone(),
            cpu_limit: config.cpu_limit.clone(),
            pids_limit: config.pids_limit,
            network: config.network.clone(),
            environment: config.environment.clone(),
        }
    }

    /// Arguments of `docker run` (without the binary) creating a detached, idle,
    /// resource-capped container with the whole port range published 1:1.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        for port in self.port_range.ports() {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port, port));
        }
        args.push(format!("--memory={}", self.memory_limit));
        args.push(format!("--memory-swap={}", self.memory_limit));
        args.push(format!("--cpus={}", self.cpu_limit));
        args.push(format!("--pids-limit={}", self.pids_limit));
        args.push("--network".to_string());
        args.push(self.network.clone());
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            self.workspace_dir.display(),
            self.workspace_mount
        ));
        args.push("-w".to_string());
        args.push(self.workspace_mount.clone());
        for var in &self.environment {
            args.push("-e".to_string());
            args.push(var.clone());
        }
        args.push(self.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    #[cfg(test)]
    pub fn for_test(name: &str, workspace_dir: &Path) -> Self {
        Self::from_config(
            &ContainerConfig::default(),
            name,
            workspace_dir,
            PortRange::new(4000, 4009),
        )
    }
}

/// Captured result of a non-interactive command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How an interactive shell is attached to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Allocate a TTY inside the container (`-it`).
    Tty,
    /// Plain stdin/stdout streams (`-i`).
    Pipe,
}
