use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Terminal every connection starts with. Only a disconnect closes it.
pub const DEFAULT_TERMINAL_ID: &str = "default";

/// Message shown when a shell exits on its own.
pub const SESSION_ENDED_MESSAGE: &str = "\r\n[Terminal session ended]\r\n";

/// Ephemeral identifier of one real-time connection (one browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        ConnectionId(id.into())
    }

    pub fn generate() -> Self {
        ConnectionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry of `terminal:list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Which attach mechanism backs a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Pty,
    Pipe,
}

/// What a launcher needs to attach a shell to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub container_name: String,
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
}

/// Output of an interactive process, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Data(Vec<u8>),
    /// Last event of a process. `None` when killed by a signal or the code is unknown.
    Exit(Option<i32>),
}

/// Notification from the multiplexer to the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Data { terminal_id: String, data: String },
    Closed { terminal_id: String },
}

/// Where a connection's terminal events are delivered. Called from the
/// terminal's forwarding task, so events of one terminal arrive in order.
pub type TerminalSink = Arc<dyn Fn(TerminalEvent) + Send + Sync>;

/// Incremental UTF-8 decoding of a byte stream.
///
/// A multi-byte character split across chunks is held back until complete;
/// invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flushes whatever is still held back.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_character_is_held_back() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "ok ✓ done".as_bytes();
        let split = 4; // inside the 3-byte check mark
        assert_eq!(decoder.decode(&bytes[..split]), "ok ");
        assert_eq!(decoder.decode(&bytes[split..]), "✓ done");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn truncated_tail_is_flushed_lossily() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xe2, 0x9c]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn summary_serializes_created_at_in_camel_case() {
        let summary = TerminalSummary {
            id: "default".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], "default");
        assert!(json.get("createdAt").is_some());
    }
}
