//! Container management subsystem.
//!
//! One sandboxed container per user, created on first connection with memory,
//! CPU and process-count caps, the user's workspace bind-mounted, and the user's
//! port range published. Later connections reuse it, starting it if stopped.
//!
//! Re-exports:
//! - [`ContainerSupervisor`]: resolves or creates a user's container.
//! - [`ContainerRuntime`], [`DockerRuntime`]: the engine seam and its CLI implementation.
//! - [`ContainerBinding`], [`ContainerSpec`], [`ContainerStats`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! let binding = supervisor.ensure_container(&UserId::new("42")).await?;
//! println!("{} at {}", binding.container_name, binding.workspace_dir.display());
//! ```

#[cfg(test)]
pub mod fake_runtime;
pub mod runtime;
pub mod supervisor;
pub mod types;

pub use runtime::{ContainerRuntime, DockerRuntime};
pub use supervisor::ContainerSupervisor;
pub use types::{AttachMode, ContainerBinding, ContainerSpec, ContainerStats, ExecOutput};
