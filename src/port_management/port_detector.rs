use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, trace};
use regex::Regex;

use crate::container_management::runtime::ContainerRuntime;
use crate::error_handling::types::PortError;

/// Shell snippet listing listening sockets, trying the tools a base image is likely to ship.
pub const LISTENER_COMMAND: &str =
    "netstat -tuln 2>/dev/null || ss -tuln 2>/dev/null || cat /proc/net/tcp /proc/net/tcp6 2>/dev/null";

const TCP_LISTEN_STATE: &str = "0A";

fn listen_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\[::\]|0\.0\.0\.0|127\.0\.0\.1|\*|::):(\d+)").ok())
        .as_ref()
}

/// Extracts listening ports from `netstat`/`ss` output or raw `/proc/net/tcp` rows.
///
/// Ports below `min_port` are dropped. The result is sorted and unique.
pub fn parse_listeners(output: &str, min_port: u16) -> Vec<u16> {
    let mut ports = BTreeSet::new();

    for line in output.lines() {
        let port = if line.to_ascii_lowercase().contains("listen") {
            listen_regex()
                .and_then(|re| re.captures(line))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u16>().ok())
        } else {
            parse_proc_row(line)
        };

        if let Some(port) = port.filter(|p| *p >= min_port) {
            ports.insert(port);
        }
    }

    ports.into_iter().collect()
}

/// `  0: 00000000:0BB8 00000000:0000 0A ...`
fn parse_proc_row(line: &str) -> Option<u16> {
    let mut fields = line.split_whitespace();
    let slot = fields.next()?;
    if !slot.ends_with(':') || !slot[..slot.len() - 1].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let local = fields.next()?;
    let _remote = fields.next()?;
    if fields.next()? != TCP_LISTEN_STATE {
        return None;
    }
    let (_, port_hex) = local.rsplit_once(':')?;
    u16::from_str_radix(port_hex, 16).ok()
}

/// Polls a container's listener table through the runtime.
pub struct PortDetector {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
    min_port: u16,
}

impl PortDetector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, timeout: Duration, min_port: u16) -> Self {
        Self {
            runtime,
            timeout,
            min_port,
        }
    }

    pub async fn detect(&self, container_name: &str) -> Result<Vec<u16>, PortError> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            LISTENER_COMMAND.to_string(),
        ];
        let output = self
            .runtime
            .exec(container_name, &command, Some(self.timeout))
            .await
            .map_err(|e| PortError::DetectionFailed(e.to_string()))?;

        trace!("Listener table of {}: {}", container_name, output.stdout);
        let ports = parse_listeners(&output.stdout, self.min_port);
        debug!("Detected listening ports in {}: {:?}", container_name, ports);
        Ok(ports)
    }
}
