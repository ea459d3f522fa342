use serde::Deserialize;
use std::path::PathBuf;

/// Listening socket and public addressing of the service.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Host name placed in service URLs pushed to clients.
    pub public_host: String,
    /// Origin allowed by CORS for the browser editor.
    pub allowed_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            public_host: "localhost".to_string(),
            allowed_origin: "http://localhost:5173".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the service issuing access tokens.
    pub access_token_secret: String,
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: String::new(),
            cookie_name: "accessToken".to_string(),
        }
    }
}

/// Everything the supervisor needs to create a per-user container.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub runtime_binary: String,
    pub image: String,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub pids_limit: u32,
    pub network: String,
    pub workspace_root: PathBuf,
    /// Path of the workspace inside the container.
    pub workspace_mount: String,
    pub name_prefix: String,
    pub environment: Vec<String>,
    /// Prune stopped containers older than this many seconds. `None` disables pruning.
    pub prune_stopped_after_secs: Option<u64>,
    pub prune_interval_secs: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".to_string(),
            image: "ide-base:latest".to_string(),
            memory_limit: "512m".to_string(),
            cpu_limit: "0.5".to_string(),
            pids_limit: 100,
            network: "bridge".to_string(),
            workspace_root: PathBuf::from("./tmp"),
            workspace_mount: "/workspace".to_string(),
            name_prefix: "user_".to_string(),
            environment: vec!["NODE_ENV=development".to_string()],
            prune_stopped_after_secs: None,
            prune_interval_secs: 3600,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub base_port: u16,
    pub ports_per_user: u16,
    pub poll_interval_secs: u64,
    pub initial_poll_delay_ms: u64,
    pub detection_timeout_secs: u64,
    /// Listeners below this port (system services) are never reported.
    pub min_detected_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            base_port: 4000,
            ports_per_user: 10,
            poll_interval_secs: 5,
            initial_poll_delay_ms: 2000,
            detection_timeout_secs: 5,
            min_detected_port: 1000,
        }
    }
}

/// How interactive shells are attached to the container.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalMode {
    /// Native pseudo-terminal, falling back to pipes when unavailable.
    Auto,
    Pty,
    Pipe,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub max_per_connection: usize,
    pub mode: TerminalMode,
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub setup_delay_ms: u64,
    pub prompt: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_per_connection: 3,
            mode: TerminalMode::Auto,
            shell: "bash".to_string(),
            cols: 80,
            rows: 30,
            setup_delay_ms: 500,
            prompt: r"\[\033[01;32m\]bash>\[\033[00m\] ".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub excluded_dirs: Vec<String>,
    pub tree_timeout_secs: u64,
    pub refresh_delay_ms: u64,
    /// Commands whose completion triggers a file tree refresh.
    pub refresh_commands: Vec<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            excluded_dirs: ["node_modules", ".git", "dist", "build", ".next", ".cache"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tree_timeout_secs: 10,
            refresh_delay_ms: 200,
            refresh_commands: ["touch", "mkdir", "rm", "mv", "cp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub records_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_file: PathBuf::from("./userPorts.json"),
        }
    }
}
