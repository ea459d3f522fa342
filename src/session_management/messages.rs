//! Frames exchanged over the real-time channel: `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_handling::types::FrameError;
use crate::file_management::types::FileTree;
use crate::port_management::types::PortInfo;
use crate::terminal_management::types::{TerminalEvent, TerminalSummary};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminal {
    #[serde(default)]
    pub terminal_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTerminal {
    pub terminal_id: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeTerminal {
    pub terminal_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTerminal {
    pub terminal_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeFile {
    pub path: String,
    pub content: String,
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    TerminalCreate(CreateTerminal),
    TerminalWrite(WriteTerminal),
    TerminalResize(ResizeTerminal),
    TerminalClose(CloseTerminal),
    TerminalList,
    FileChange(ChangeFile),
    FileTreeRefresh,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T, FrameError> {
    // payload-less events may omit "data" or send null
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| FrameError::Malformed(e.to_string()))
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let envelope: Envelope =
            serde_json::from_str(frame).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let event = match envelope.event.as_str() {
            "terminal:create" => ClientEvent::TerminalCreate(payload(envelope.data)?),
            "terminal:write" => ClientEvent::TerminalWrite(payload(envelope.data)?),
            "terminal:resize" => ClientEvent::TerminalResize(payload(envelope.data)?),
            "terminal:close" => ClientEvent::TerminalClose(payload(envelope.data)?),
            "terminal:list" => ClientEvent::TerminalList,
            "file:change" => ClientEvent::FileChange(payload(envelope.data)?),
            "file:tree:refresh" => ClientEvent::FileTreeRefresh,
            other => return Err(FrameError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "terminal:data")]
    TerminalData { terminal_id: String, data: String },
    #[serde(rename = "terminal:created")]
    TerminalCreated { terminal_id: String },
    #[serde(rename = "terminal:closed")]
    TerminalClosed { terminal_id: String },
    #[serde(rename = "terminal:error")]
    TerminalError {
        terminal_id: Option<String>,
        error: String,
    },
    #[serde(rename = "terminal:list")]
    TerminalList { terminals: Vec<TerminalSummary> },
    #[serde(rename = "file:refresh")]
    FileRefresh(FileTree),
    #[serde(rename = "ports:update")]
    PortsUpdate(PortInfo),
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<TerminalEvent> for ServerEvent {
    fn from(event: TerminalEvent) -> Self {
        match event {
            TerminalEvent::Data { terminal_id, data } => ServerEvent::TerminalData { terminal_id, data },
            TerminalEvent::Closed { terminal_id } => ServerEvent::TerminalClosed { terminal_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_management::types::ServiceEndpoint;
    use crate::storage::types::PortRange;
    use serde_json::json;

    #[test]
    fn parses_client_events() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"terminal:write","data":{"terminalId":"default","input":"ls\r"}}"#),
            Ok(ClientEvent::TerminalWrite(WriteTerminal {
                terminal_id: "default".to_string(),
                input: "ls\r".to_string()
            }))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"terminal:resize","data":{"terminalId":"t1","cols":120,"rows":40}}"#),
            Ok(ClientEvent::TerminalResize(ResizeTerminal {
                terminal_id: "t1".to_string(),
                cols: 120,
                rows: 40
            }))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"file:change","data":{"path":"/a.js","content":"x"}}"#),
            Ok(ClientEvent::FileChange(ChangeFile {
                path: "/a.js".to_string(),
                content: "x".to_string()
            }))
        );
    }

    #[test]
    fn payload_less_events_accept_missing_or_null_data() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"terminal:create"}"#),
            Ok(ClientEvent::TerminalCreate(CreateTerminal { terminal_id: None }))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"terminal:create","data":null}"#),
            Ok(ClientEvent::TerminalCreate(CreateTerminal { terminal_id: None }))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"terminal:list"}"#),
            Ok(ClientEvent::TerminalList)
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"file:tree:refresh","data":{}}"#),
            Ok(ClientEvent::FileTreeRefresh)
        );
    }

    #[test]
    fn malformed_and_unknown_frames_are_errors() {
        assert!(matches!(ClientEvent::parse("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"terminal:write","data":{"terminalId":"x"}}"#),
            Err(FrameError::Malformed(_))
        ));
        assert_eq!(
            ClientEvent::parse(r#"{"event":"ai:prompt","data":{}}"#),
            Err(FrameError::UnknownEvent("ai:prompt".to_string()))
        );
    }

    #[test]
    fn server_events_use_event_names_and_camel_case() {
        let frame = ServerEvent::TerminalData {
            terminal_id: "default".to_string(),
            data: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "terminal:data", "data": {"terminalId": "default", "data": "hi"}})
        );

        let error = ServerEvent::TerminalError {
            terminal_id: Some("t3".to_string()),
            error: "Maximum 3 terminals allowed".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"event": "terminal:error", "data": {"terminalId": "t3", "error": "Maximum 3 terminals allowed"}})
        );
    }

    #[test]
    fn ports_update_carries_port_info() {
        let info = PortInfo {
            allocated_range: PortRange::new(4000, 4009),
            services: vec![ServiceEndpoint {
                internal: 4000,
                external: Some(4000),
                url: Some("http://localhost:4000".to_string()),
            }],
        };
        assert_eq!(
            serde_json::to_value(ServerEvent::PortsUpdate(info)).unwrap(),
            json!({
                "event": "ports:update",
                "data": {
                    "allocatedRange": [4000, 4009],
                    "services": [{"internal": 4000, "external": 4000, "url": "http://localhost:4000"}]
                }
            })
        );
    }

    #[test]
    fn file_refresh_is_the_bare_tree() {
        let mut tree = FileTree::new();
        tree.insert(&["app.js"], false);
        assert_eq!(
            serde_json::to_value(ServerEvent::FileRefresh(tree)).unwrap(),
            json!({"event": "file:refresh", "data": {"app.js": null}})
        );
    }
}
