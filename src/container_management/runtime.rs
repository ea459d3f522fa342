use async_trait::async_trait;
use log::{debug, error, info};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::container_management::types::{AttachMode, ContainerSpec, ExecOutput};
use crate::error_handling::types::ContainerError;

const STATS_FORMAT: &str = "{{.Name}}: CPU {{.CPUPerc}} | MEM {{.MemUsage}}";

/// Narrow interface over the container engine.
///
/// Production code talks to [`DockerRuntime`]; tests use an in-memory fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, ContainerError>;

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError>;

    async fn start(&self, name: &str) -> Result<(), ContainerError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;

    /// Runs `command` inside the container and captures its output.
    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as an error.
    async fn exec(
        &self,
        name: &str,
        command: &[String],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, ContainerError>;

    /// One `name: CPU x | MEM y` line per running container.
    async fn stats(&self) -> Result<Vec<String>, ContainerError>;

    /// Removes stopped containers older than `older_than`.
    async fn prune_stopped(&self, older_than: Duration) -> Result<(), ContainerError>;

    /// Host argv attaching an interactive `shell` to the container.
    fn attach_command(&self, name: &str, shell: &str, mode: AttachMode) -> Vec<String>;
}

/// Whether `docker inspect` failed because the object is absent rather than
/// because the daemon or CLI failed.
fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}

/// [`ContainerRuntime`] backed by the docker CLI.
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that the CLI is installed and the daemon answers.
    pub async fn check_available(&self) -> Result<(), ContainerError> {
        let output = self.run(&["version", "--format", "{{.Server.Version}}"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("{} daemon is not reachable: {}", self.binary, stderr);
            return Err(ContainerError::RuntimeNotAvailable(stderr));
        }
        info!(
            "Container runtime {} available (server {})",
            self.binary,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<Output, ContainerError> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        debug!("Running {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ContainerError::RuntimeNotAvailable(format!("{} not found", self.binary))
                } else {
                    ContainerError::IoError(e)
                }
            })
    }

    fn stderr_of(output: &Output) -> String {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        let output = self.run(&["inspect", "--type", "container", name]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = Self::stderr_of(&output);
        if is_missing_object(&stderr) {
            return Ok(false);
        }
        error!("Could not inspect container {}: {}", name, stderr);
        Err(ContainerError::InspectFailed(stderr))
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        let output = self.run(&["inspect", "-f", "{{.State.Running}}", name]).await?;
        if !output.status.success() {
            return Err(ContainerError::InspectFailed(Self::stderr_of(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        let output = self.run(&["start", name]).await?;
        if !output.status.success() {
            let stderr = Self::stderr_of(&output);
            error!("Failed to start container {}: {}", name, stderr);
            return Err(ContainerError::StartFailed(stderr));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let output = self.run(&spec.run_args()).await?;
        if !output.status.success() {
            let stderr = Self::stderr_of(&output);
            error!("Failed to create container {}: {}", spec.name, stderr);
            return Err(ContainerError::CreationFailed(stderr));
        }
        debug!(
            "Container {} id {}",
            spec.name,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn exec(
        &self,
        name: &str,
        command: &[String],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, ContainerError> {
        let mut args = vec!["exec".to_string(), name.to_string()];
        args.extend(command.iter().cloned());

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(&args))
                .await
                .map_err(|_| {
                    ContainerError::Timeout(format!("exec in {} after {:?}", name, limit))
                })??,
            None => self.run(&args).await?,
        };

        // 125-127: the engine itself could not run the command
        if let Some(code @ 125..=127) = output.status.code() {
            return Err(ContainerError::ExecFailed(format!(
                "exit {}: {}",
                code,
                Self::stderr_of(&output)
            )));
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    async fn stats(&self) -> Result<Vec<String>, ContainerError> {
        let output = self
            .run(&["stats", "--no-stream", "--format", STATS_FORMAT])
            .await?;
        if !output.status.success() {
            return Err(ContainerError::InspectFailed(Self::stderr_of(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    async fn prune_stopped(&self, older_than: Duration) -> Result<(), ContainerError> {
        let filter = format!("until={}s", older_than.as_secs());
        let output = self
            .run(&["container", "prune", "-f", "--filter", &filter])
            .await?;
        if !output.status.success() {
            return Err(ContainerError::ExecFailed(Self::stderr_of(&output)));
        }
        info!(
            "Pruned stopped containers: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    fn attach_command(&self, name: &str, shell: &str, mode: AttachMode) -> Vec<String> {
        let mut argv = vec![self.binary.clone(), "exec".to_string()];
        match mode {
            AttachMode::Tty => {
                argv.push("-it".to_string());
                argv.push("-e".to_string());
                argv.push("TERM=xterm-256color".to_string());
                argv.push("-e".to_string());
                argv.push("COLORTERM=truecolor".to_string());
            }
            AttachMode::Pipe => argv.push("-i".to_string()),
        }
        argv.push(name.to_string());
        argv.push(shell.to_string());
        argv
    }
}
