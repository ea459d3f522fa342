use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::configuration::types::TerminalConfig;
use crate::error_handling::types::TerminalError;
use crate::terminal_management::process::{InteractiveProcess, ProcessEvents, ProcessLauncher};
use crate::terminal_management::types::{
    ConnectionId, LaunchSpec, ProcessEvent, TerminalEvent, TerminalSink, TerminalSummary,
    Utf8Decoder, DEFAULT_TERMINAL_ID, SESSION_ENDED_MESSAGE,
};

struct TerminalSession {
    created_at: DateTime<Utc>,
    /// Distinguishes a re-created terminal from an earlier one with the same id.
    instance: u64,
    container_name: String,
    process: Arc<dyn InteractiveProcess>,
    input: mpsc::UnboundedSender<Vec<u8>>,
}

struct ConnectionTerminals {
    sessions: HashMap<String, TerminalSession>,
    sink: TerminalSink,
    closed: bool,
}

type ConnectionEntry = Arc<AsyncMutex<ConnectionTerminals>>;

/// Interactive shells per connection, keyed by terminal id.
///
/// Every operation on one connection's terminal set runs under that connection's
/// lock, so the capacity check cannot race. Connections never contend with each other.
pub struct TerminalMultiplexer {
    launcher: Arc<dyn ProcessLauncher>,
    config: TerminalConfig,
    workspace_mount: String,
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    next_instance: AtomicU64,
}

impl TerminalMultiplexer {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: TerminalConfig, workspace_mount: String) -> Self {
        info!(
            "TerminalMultiplexer initialized (max {} terminals per connection)",
            config.max_per_connection
        );
        Self {
            launcher,
            config,
            workspace_mount,
            connections: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
        }
    }

    pub fn max_terminals(&self) -> usize {
        self.config.max_per_connection
    }

    /// Registers a connection and where its terminal events go.
    pub fn open(&self, connection_id: &ConnectionId, sink: TerminalSink) {
        let entry = Arc::new(AsyncMutex::new(ConnectionTerminals {
            sessions: HashMap::new(),
            sink,
            closed: false,
        }));
        self.connections
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(connection_id.clone(), entry);
    }

    fn entry(&self, connection_id: &ConnectionId) -> Option<ConnectionEntry> {
        self.connections
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(connection_id)
            .cloned()
    }

    /// Keystrokes putting a fresh shell in a known state: prompt, workspace, clean screen.
    pub fn setup_commands(&self) -> Vec<String> {
        vec![
            format!("export PS1='{}'\r", self.config.prompt),
            format!("cd {}\r", self.workspace_mount),
            "clear\r".to_string(),
        ]
    }

    /// Starts a shell in `container_name` for the connection.
    ///
    /// Without an id, `terminal_<millis>` is generated. Spawning an id the connection
    /// already has returns the existing terminal.
    pub async fn spawn(
        &self,
        container_name: &str,
        connection_id: &ConnectionId,
        terminal_id: Option<&str>,
    ) -> Result<TerminalSummary, TerminalError> {
        let entry = self
            .entry(connection_id)
            .ok_or_else(|| TerminalError::ConnectionClosed(connection_id.to_string()))?;
        let mut terminals = entry.lock().await;
        if terminals.closed {
            return Err(TerminalError::ConnectionClosed(connection_id.to_string()));
        }

        let terminal_id = match terminal_id {
            Some(id) => id.to_string(),
            None => generate_terminal_id(&terminals.sessions),
        };

        if let Some(existing) = terminals.sessions.get(&terminal_id) {
            debug!(
                "Terminal {} already exists on connection {}",
                terminal_id, connection_id
            );
            return Ok(TerminalSummary {
                id: terminal_id,
                created_at: existing.created_at,
            });
        }

        let max = self.config.max_per_connection;
        if terminals.sessions.len() >= max {
            warn!(
                "Connection {} reached the terminal limit ({})",
                connection_id, max
            );
            return Err(TerminalError::CapacityReached { max });
        }

        let spec = LaunchSpec {
            container_name: container_name.to_string(),
            shell: self.config.shell.clone(),
            cols: self.config.cols,
            rows: self.config.rows,
        };
        let launcher = self.launcher.clone();
        let (process, events) = tokio::task::spawn_blocking(move || launcher.launch(&spec))
            .await
            .map_err(|e| TerminalError::SpawnFailed(e.to_string()))??;

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        tokio::spawn(feed_input(
            process.clone(),
            input_rx,
            self.setup_commands(),
            Duration::from_millis(self.config.setup_delay_ms),
        ));
        tokio::spawn(forward_output(
            events,
            terminals.sink.clone(),
            Arc::downgrade(&entry),
            terminal_id.clone(),
            instance,
        ));

        let created_at = Utc::now();
        info!(
            "Spawned terminal {} ({:?}) in {} for connection {}",
            terminal_id,
            process.mode(),
            container_name,
            connection_id
        );
        terminals.sessions.insert(
            terminal_id.clone(),
            TerminalSession {
                created_at,
                instance,
                container_name: container_name.to_string(),
                process,
                input: input_tx,
            },
        );

        Ok(TerminalSummary {
            id: terminal_id,
            created_at,
        })
    }

    /// Forwards raw input to the terminal. Unknown terminals are ignored; returns
    /// whether the bytes were queued.
    pub async fn write(&self, connection_id: &ConnectionId, terminal_id: &str, data: &[u8]) -> bool {
        let Some(entry) = self.entry(connection_id) else {
            return false;
        };
        let terminals = entry.lock().await;
        match terminals.sessions.get(terminal_id) {
            Some(session) => session.input.send(data.to_vec()).is_ok(),
            None => {
                debug!("Write to unknown terminal {} ignored", terminal_id);
                false
            }
        }
    }

    pub async fn resize(&self, connection_id: &ConnectionId, terminal_id: &str, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        let Some(entry) = self.entry(connection_id) else {
            return;
        };
        let terminals = entry.lock().await;
        if let Some(session) = terminals.sessions.get(terminal_id) {
            if let Err(e) = session.process.resize(cols, rows) {
                debug!("Resize of terminal {} failed: {}", terminal_id, e);
            }
        }
    }

    /// Closes one terminal on user request. The default terminal is refused.
    /// Returns `Ok(false)` when no such terminal exists.
    pub async fn close(&self, connection_id: &ConnectionId, terminal_id: &str) -> Result<bool, TerminalError> {
        if terminal_id == DEFAULT_TERMINAL_ID {
            return Err(TerminalError::DefaultProtected);
        }
        let Some(entry) = self.entry(connection_id) else {
            return Ok(false);
        };
        let mut terminals = entry.lock().await;
        match terminals.sessions.remove(terminal_id) {
            Some(session) => {
                session.process.kill();
                info!(
                    "Closed terminal {} in {} for connection {}",
                    terminal_id, session.container_name, connection_id
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Terminates every terminal of the connection and forgets it. The container is untouched.
    pub async fn close_all(&self, connection_id: &ConnectionId) -> usize {
        let entry = self
            .connections
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(connection_id);
        let Some(entry) = entry else {
            return 0;
        };

        let mut terminals = entry.lock().await;
        terminals.closed = true;
        let count = terminals.sessions.len();
        for (terminal_id, session) in terminals.sessions.drain() {
            debug!("Killing terminal {} of connection {}", terminal_id, connection_id);
            session.process.kill();
        }
        info!("Closed {} terminal(s) of connection {}", count, connection_id);
        count
    }

    pub async fn count(&self, connection_id: &ConnectionId) -> usize {
        match self.entry(connection_id) {
            Some(entry) => entry.lock().await.sessions.len(),
            None => 0,
        }
    }

    /// Terminals of the connection, oldest first.
    pub async fn list(&self, connection_id: &ConnectionId) -> Vec<TerminalSummary> {
        let Some(entry) = self.entry(connection_id) else {
            return Vec::new();
        };
        let terminals = entry.lock().await;
        let mut list: Vec<TerminalSummary> = terminals
            .sessions
            .iter()
            .map(|(id, s)| TerminalSummary {
                id: id.clone(),
                created_at: s.created_at,
            })
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }
}

fn generate_terminal_id(existing: &HashMap<String, TerminalSession>) -> String {
    let mut millis = Utc::now().timestamp_millis();
    loop {
        let id = format!("terminal_{}", millis);
        if !existing.contains_key(&id) {
            return id;
        }
        millis += 1;
    }
}

/// Writes the setup keystrokes after the shell had time to start, then relays user input.
async fn feed_input(
    process: Arc<dyn InteractiveProcess>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
    setup: Vec<String>,
    delay: Duration,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    for command in setup {
        if let Err(e) = process.write(command.as_bytes()) {
            debug!("Terminal setup aborted: {}", e);
            return;
        }
    }
    while let Some(chunk) = input.recv().await {
        if let Err(e) = process.write(&chunk) {
            debug!("Terminal input closed: {}", e);
            break;
        }
    }
}

/// Relays process output to the connection. When the process exits on its own,
/// the terminal is removed and the client told it ended.
async fn forward_output(
    mut events: ProcessEvents,
    sink: TerminalSink,
    entry: Weak<AsyncMutex<ConnectionTerminals>>,
    terminal_id: String,
    instance: u64,
) {
    let mut decoder = Utf8Decoder::default();
    let mut exit_code = None;

    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Data(bytes) => {
                let data = decoder.decode(&bytes);
                if !data.is_empty() {
                    sink(TerminalEvent::Data {
                        terminal_id: terminal_id.clone(),
                        data,
                    });
                }
            }
            ProcessEvent::Exit(code) => {
                exit_code = code;
                break;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        sink(TerminalEvent::Data {
            terminal_id: terminal_id.clone(),
            data: tail,
        });
    }

    let Some(entry) = entry.upgrade() else {
        return;
    };
    let mut terminals = entry.lock().await;
    let still_current = terminals
        .sessions
        .get(&terminal_id)
        .map(|s| s.instance == instance)
        .unwrap_or(false);
    if terminals.closed || !still_current {
        // closed on request; the requester already reported it
        return;
    }
    terminals.sessions.remove(&terminal_id);
    drop(terminals);

    info!("Terminal {} exited with {:?}", terminal_id, exit_code);
    sink(TerminalEvent::Data {
        terminal_id: terminal_id.clone(),
        data: SESSION_ENDED_MESSAGE.to_string(),
    });
    sink(TerminalEvent::Closed { terminal_id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal_management::fake_process::FakeLauncher;

    fn mux(launcher: Arc<FakeLauncher>) -> TerminalMultiplexer {
        TerminalMultiplexer::new(launcher, TerminalConfig::default(), "/workspace".to_string())
    }

    fn sink() -> (TerminalSink, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: TerminalSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn setup_commands_precede_user_input() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);

        mux.spawn("user_a", &conn, Some("default")).await.unwrap();
        assert!(mux.write(&conn, "default", b"ls\r").await);
        settle().await;

        let written = launcher.last().written();
        let expected = format!(
            "export PS1='{}'\rcd /workspace\rclear\rls\r",
            TerminalConfig::default().prompt
        );
        assert_eq!(written, expected);
        assert_eq!(launcher.last().spec.container_name, "user_a");
        assert_eq!(launcher.last().spec.shell, "bash");
    }

    #[tokio::test(start_paused = true)]
    async fn output_is_forwarded_in_order_with_terminal_id() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, mut rx) = sink();
        mux.open(&conn, sink);
        mux.spawn("user_a", &conn, Some("t1")).await.unwrap();

        let process = launcher.last();
        process.emit(b"hello ");
        process.emit("w\u{00f6}rld".as_bytes());

        assert_eq!(
            rx.recv().await.unwrap(),
            TerminalEvent::Data {
                terminal_id: "t1".to_string(),
                data: "hello ".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TerminalEvent::Data {
                terminal_id: "t1".to_string(),
                data: "w\u{00f6}rld".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_beyond_cap_is_rejected_without_side_effects() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);

        mux.spawn("user_a", &conn, Some("default")).await.unwrap();
        mux.spawn("user_a", &conn, Some("t1")).await.unwrap();
        mux.spawn("user_a", &conn, Some("t2")).await.unwrap();

        let err = mux.spawn("user_a", &conn, Some("t3")).await.unwrap_err();
        assert!(matches!(err, TerminalError::CapacityReached { max: 3 }));
        assert_eq!(mux.count(&conn).await, 3);
        assert_eq!(launcher.launch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn spawning_an_existing_id_is_idempotent() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);

        let first = mux.spawn("user_a", &conn, Some("t1")).await.unwrap();
        let second = mux.spawn("user_a", &conn, Some("t1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generated_ids_are_unique() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);

        let a = mux.spawn("user_a", &conn, None).await.unwrap();
        let b = mux.spawn("user_a", &conn, None).await.unwrap();
        assert!(a.id.starts_with("terminal_"));
        assert_ne!(a.id, b.id);
        assert_eq!(mux.list(&conn).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn default_terminal_cannot_be_closed_by_request() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);
        mux.spawn("user_a", &conn, Some("default")).await.unwrap();

        let err = mux.close(&conn, DEFAULT_TERMINAL_ID).await.unwrap_err();
        assert!(matches!(err, TerminalError::DefaultProtected));
        assert_eq!(mux.count(&conn).await, 1);
        assert!(!launcher.last().is_killed());
    }

    #[tokio::test(start_paused = true)]
    async fn close_kills_the_process_quietly() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, mut rx) = sink();
        mux.open(&conn, sink);
        mux.spawn("user_a", &conn, Some("t1")).await.unwrap();

        assert!(mux.close(&conn, "t1").await.unwrap());
        assert!(launcher.last().is_killed());
        assert_eq!(mux.count(&conn).await, 0);
        assert!(!mux.close(&conn, "t1").await.unwrap());

        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn process_exit_reports_and_removes_the_session() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, mut rx) = sink();
        mux.open(&conn, sink);
        mux.spawn("user_a", &conn, Some("t1")).await.unwrap();

        launcher.last().exit(0);

        assert_eq!(
            rx.recv().await.unwrap(),
            TerminalEvent::Data {
                terminal_id: "t1".to_string(),
                data: SESSION_ENDED_MESSAGE.to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TerminalEvent::Closed {
                terminal_id: "t1".to_string()
            }
        );
        assert_eq!(mux.count(&conn).await, 0);
        // no automatic respawn
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_terminates_everything_and_blocks_new_spawns() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);
        for id in ["default", "t1", "t2"] {
            mux.spawn("user_a", &conn, Some(id)).await.unwrap();
        }

        assert_eq!(mux.close_all(&conn).await, 3);
        for i in 0..3 {
            assert!(launcher.process(i).is_killed());
        }
        assert_eq!(mux.count(&conn).await, 0);
        assert!(mux.list(&conn).await.is_empty());

        let err = mux.spawn("user_a", &conn, Some("t3")).await.unwrap_err();
        assert!(matches!(err, TerminalError::ConnectionClosed(_)));
        assert_eq!(mux.close_all(&conn).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connections_are_independent() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let (a, b) = (ConnectionId::new("a"), ConnectionId::new("b"));
        let (sink_a, _ra) = sink();
        let (sink_b, _rb) = sink();
        mux.open(&a, sink_a);
        mux.open(&b, sink_b);

        mux.spawn("user_a", &a, Some("default")).await.unwrap();
        mux.spawn("user_a", &b, Some("default")).await.unwrap();
        mux.close_all(&a).await;

        assert_eq!(mux.count(&b).await, 1);
        assert!(!launcher.process(1).is_killed());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_terminals_are_no_ops() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);

        assert!(!mux.write(&conn, "nope", b"x").await);
        mux.resize(&conn, "nope", 100, 40).await;
        assert!(!mux.write(&ConnectionId::new("ghost"), "default", b"x").await);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_reaches_the_process() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);
        mux.spawn("user_a", &conn, Some("default")).await.unwrap();

        mux.resize(&conn, "default", 120, 40).await;
        mux.resize(&conn, "default", 0, 40).await;
        assert_eq!(launcher.last().sizes(), vec![(120, 40)]);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_leaves_no_session() {
        let launcher = Arc::new(FakeLauncher::new());
        let mux = mux(launcher.clone());
        let conn = ConnectionId::new("c1");
        let (sink, _rx) = sink();
        mux.open(&conn, sink);
        launcher.fail_next();

        let err = mux.spawn("user_a", &conn, Some("t1")).await.unwrap_err();
        assert!(matches!(err, TerminalError::SpawnFailed(_)));
        assert_eq!(mux.count(&conn).await, 0);
    }
}
