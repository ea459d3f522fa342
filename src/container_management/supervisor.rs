use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::configuration::types::ContainerConfig;
use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::{ContainerBinding, ContainerSpec, ContainerStats};
use crate::error_handling::types::ContainerError;
use crate::port_management::port_allocator::PortAllocator;
use crate::storage::types::{UserId, UserRecord};
use crate::storage::user_records::UserRecordTable;

/// Provisions and reuses one resource-capped container per user.
///
/// Containers are never removed here; they outlive connections and are only
/// reclaimed by the optional prune job or by external cleanup.
pub struct ContainerSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    records: Arc<UserRecordTable>,
    ports: Arc<PortAllocator>,
    config: ContainerConfig,
    stats: Mutex<ContainerStats>,
}

/// `name_prefix + user_id` with everything outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn container_name_for(prefix: &str, user_id: &UserId) -> String {
    format!("{}{}", prefix, user_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ContainerSupervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        records: Arc<UserRecordTable>,
        ports: Arc<PortAllocator>,
        config: ContainerConfig,
    ) -> Self {
        info!(
            "ContainerSupervisor initialized (image {}, workspaces under {})",
            config.image,
            config.workspace_root.display()
        );
        Self {
            runtime,
            records,
            ports,
            config,
            stats: Mutex::new(ContainerStats::default()),
        }
    }

    pub fn container_name(&self, user_id: &UserId) -> String {
        container_name_for(&self.config.name_prefix, user_id)
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    pub fn get_container_stats(&self) -> ContainerStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn bump<F: FnOnce(&mut ContainerStats)>(&self, f: F) {
        f(&mut self.stats.lock().unwrap_or_else(|p| p.into_inner()));
    }

    /// Resolves the user's container, creating it on first use.
    ///
    /// Serialized per user: concurrent calls for the same user wait for the first
    /// one and then observe its container.
    pub async fn ensure_container(&self, user_id: &UserId) -> Result<ContainerBinding, ContainerError> {
        let name = self.container_name(user_id);
        let mut guard = self.records.lock(user_id).await;

        if let Some(record) = guard.record().cloned() {
            if self.runtime.exists(&record.container_name).await? {
                self.ensure_running(&record.container_name).await?;
                self.bump(|s| s.total_reused += 1);
                info!(
                    "Reusing container {} for user {}",
                    record.container_name, user_id
                );
                return Ok(ContainerBinding {
                    container_name: record.container_name,
                    workspace_dir: record.workspace_dir,
                });
            }
            warn!(
                "Recorded container {} of user {} no longer exists, recreating",
                record.container_name, user_id
            );
        } else if self.runtime.exists(&name).await? {
            // record lost but the container survived
            self.ensure_running(&name).await?;
            let workspace_dir = self.prepare_workspace(&name).await?;
            let range = self.ports.allocate_range(user_id)?;
            guard.put(UserRecord::new(name.clone(), workspace_dir.clone(), range))?;
            self.bump(|s| s.total_adopted += 1);
            warn!(
                "Adopted unrecorded container {} for user {}; published ports may differ from {}",
                name, user_id, range
            );
            return Ok(ContainerBinding {
                container_name: name,
                workspace_dir,
            });
        }

        match self.create_container(user_id, &name).await {
            Ok(record) => {
                guard.put(record.clone())?;
                self.bump(|s| s.total_created += 1);
                info!(
                    "Created container {} for user {} with ports {}",
                    name, user_id, record.port_range
                );
                Ok(ContainerBinding {
                    container_name: record.container_name,
                    workspace_dir: record.workspace_dir,
                })
            }
            Err(e) => {
                if guard.record().is_none() {
                    // nothing persisted the reservation; hand the range back
                    self.ports.release(user_id);
                }
                self.bump(|s| s.failed_count += 1);
                error!("Provisioning container for user {} failed: {}", user_id, e);
                Err(e)
            }
        }
    }

    async fn create_container(&self, user_id: &UserId, name: &str) -> Result<UserRecord, ContainerError> {
        let workspace_dir = self.prepare_workspace(name).await?;
        let range = self.ports.allocate_range(user_id)?;
        let spec = ContainerSpec::from_config(&self.config, name, &workspace_dir, range);
        debug!("Creating container {} from {}", name, spec.image);
        self.runtime.create(&spec).await?;
        Ok(UserRecord::new(name.to_string(), workspace_dir, range))
    }

    async fn ensure_running(&self, name: &str) -> Result<(), ContainerError> {
        if self.runtime.is_running(name).await? {
            return Ok(());
        }
        info!("Starting stopped container {}", name);
        self.runtime.start(name).await
    }

    /// Creates `workspace_root/<name>` and returns its absolute path.
    async fn prepare_workspace(&self, name: &str) -> Result<PathBuf, ContainerError> {
        let dir = self.config.workspace_root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        let dir = tokio::fs::canonicalize(&dir).await?;
        debug!("Workspace for {} at {}", name, dir.display());
        Ok(dir)
    }

    /// Drops records whose container disappeared from the runtime, releasing their ranges.
    pub async fn cleanup_stale_entries(&self) -> usize {
        let mut removed = 0;
        for user_id in self.records.user_ids() {
            let mut guard = self.records.lock(&user_id).await;
            let name = match guard.record() {
                Some(record) => record.container_name.clone(),
                None => continue,
            };
            match self.runtime.exists(&name).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        "Removing stale entry for user {} (container {} missing)",
                        user_id, name
                    );
                    if let Err(e) = guard.remove() {
                        warn!("Failed to remove stale entry for {}: {}", user_id, e);
                        continue;
                    }
                    drop(guard);
                    self.ports.release(&user_id);
                    removed += 1;
                }
                Err(e) => warn!("Could not check container {}: {}", name, e),
            }
        }
        removed
    }

    /// Per-container CPU/memory summary lines.
    pub async fn resource_summary(&self) -> Result<Vec<String>, ContainerError> {
        self.runtime.stats().await
    }

    /// Prunes stopped containers when an age limit is configured.
    pub async fn prune_stopped(&self) -> Result<(), ContainerError> {
        match self.config.prune_stopped_after_secs {
            Some(secs) => self.runtime.prune_stopped(Duration::from_secs(secs)).await,
            None => Ok(()),
        }
    }
}
