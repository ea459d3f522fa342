use serde::Serialize;

use crate::storage::types::PortRange;

/// One program listening inside a container and where it is reachable from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub internal: u16,
    /// `None` when the user's range had no free port left.
    pub external: Option<u16>,
    pub url: Option<String>,
}

/// Snapshot pushed to clients as `ports:update` and served by `/ports/:userId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub allocated_range: PortRange,
    pub services: Vec<ServiceEndpoint>,
}
