//! In-memory [`ContainerRuntime`] used by tests across the crate.
//!
//! Containers are plain records. `find` queries are answered by walking the
//! host workspace directory, and listener-table queries return scripted text.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::{AttachMode, ContainerSpec, ExecOutput};
use crate::error_handling::types::ContainerError;
use crate::port_management::port_detector::LISTENER_COMMAND;

#[derive(Debug, Clone)]
struct FakeContainer {
    running: bool,
    workspace_dir: PathBuf,
    workspace_mount: String,
    listeners: String,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    create_calls: usize,
    start_calls: usize,
    fail_create: Option<String>,
    create_delay: Option<Duration>,
    last_spec: Option<ContainerSpec>,
    local_shell: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach commands run the requested shell directly on the host.
    pub fn local_shell() -> Self {
        let runtime = Self::default();
        runtime.state().local_shell = true;
        runtime
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn create_count(&self) -> usize {
        self.state().create_calls
    }

    pub fn start_count(&self) -> usize {
        self.state().start_calls
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state().last_spec.clone()
    }

    pub fn is_running_now(&self, name: &str) -> bool {
        self.state()
            .containers
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn fail_next_create(&self, message: &str) {
        self.state().fail_create = Some(message.to_string());
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    pub fn set_listeners(&self, name: &str, table: &str) {
        if let Some(c) = self.state().containers.get_mut(name) {
            c.listeners = table.to_string();
        }
    }

    /// Registers a container the supervisor did not create.
    pub fn insert_existing(&self, name: &str, workspace_dir: &Path, running: bool) {
        self.state().containers.insert(
            name.to_string(),
            FakeContainer {
                running,
                workspace_dir: workspace_dir.to_path_buf(),
                workspace_mount: "/workspace".to_string(),
                listeners: String::new(),
            },
        );
    }

    pub fn stop(&self, name: &str) {
        if let Some(c) = self.state().containers.get_mut(name) {
            c.running = false;
        }
    }

    pub fn remove(&self, name: &str) {
        self.state().containers.remove(name);
    }

    fn find_output(container: &FakeContainer) -> String {
        fn walk(host: &Path, inside: &str, out: &mut String) {
            let mut entries: Vec<_> = match std::fs::read_dir(host) {
                Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
                Err(_) => return,
            };
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = format!("{}/{}", inside, name);
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                out.push_str(&format!("{} {}\n", if is_dir { 'd' } else { 'f' }, path));
                if is_dir {
                    walk(&entry.path(), &path, out);
                }
            }
        }

        let mut out = format!("d {}\n", container.workspace_mount);
        walk(&container.workspace_dir, &container.workspace_mount, &mut out);
        out
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        Ok(self.state().containers.contains_key(name))
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        self.state()
            .containers
            .get(name)
            .map(|c| c.running)
            .ok_or_else(|| ContainerError::InspectFailed(format!("No such container: {}", name)))
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        let mut state = self.state();
        state.start_calls += 1;
        match state.containers.get_mut(name) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(ContainerError::StartFailed(format!("No such container: {}", name))),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.create_calls += 1;
        if let Some(message) = state.fail_create.take() {
            return Err(ContainerError::CreationFailed(message));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(ContainerError::CreationFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        state.last_spec = Some(spec.clone());
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                running: true,
                workspace_dir: spec.workspace_dir.clone(),
                workspace_mount: spec.workspace_mount.clone(),
                listeners: String::new(),
            },
        );
        Ok(())
    }

    async fn exec(
        &self,
        name: &str,
        command: &[String],
        _timeout: Option<Duration>,
    ) -> Result<ExecOutput, ContainerError> {
        let container = match self.state().containers.get(name) {
            Some(c) if c.running => c.clone(),
            Some(_) => {
                return Err(ContainerError::ExecFailed(format!(
                    "Container {} is not running",
                    name
                )))
            }
            None => {
                return Err(ContainerError::ExecFailed(format!("No such container: {}", name)))
            }
        };

        let stdout = match command.first().map(String::as_str) {
            Some("find") => Self::find_output(&container),
            Some("sh") if command.get(2).map(String::as_str) == Some(LISTENER_COMMAND) => {
                container.listeners.clone()
            }
            _ => String::new(),
        };

        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    async fn stats(&self) -> Result<Vec<String>, ContainerError> {
        let state = self.state();
        let mut names: Vec<&String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(n, _)| n)
            .collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|n| format!("{}: CPU 0.00% | MEM 1MiB / 512MiB", n))
            .collect())
    }

    async fn prune_stopped(&self, _older_than: Duration) -> Result<(), ContainerError> {
        self.state().containers.retain(|_, c| c.running);
        Ok(())
    }

    fn attach_command(&self, name: &str, shell: &str, mode: AttachMode) -> Vec<String> {
        if self.state().local_shell {
            return vec![shell.to_string()];
        }
        let flag = match mode {
            AttachMode::Tty => "-it",
            AttachMode::Pipe => "-i",
        };
        vec![
            "fake-runtime".to_string(),
            flag.to_string(),
            name.to_string(),
            shell.to_string(),
        ]
    }
}
