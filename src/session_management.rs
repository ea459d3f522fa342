//! Session Orchestrator.
//!
//! Ties one real-time connection to its user's container: provisioning, the default
//! terminal, the port poll, file-tree pushes, and teardown on disconnect.

pub mod connection_registry;
pub mod messages;
pub mod session;
pub mod session_orchestrator;

pub use connection_registry::ConnectionRegistry;
pub use messages::{ClientEvent, ServerEvent};
pub use session::UserSession;
pub use session_orchestrator::SessionOrchestrator;

/// Lifecycle of a connection.
///
/// `Connecting -> Authenticating -> ContainerReady -> Active -> Disconnected`.
/// A connection whose provisioning failed stays in `Authenticating` until it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    ContainerReady,
    Active,
    Disconnected,
}
