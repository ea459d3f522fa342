use log::warn;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::configuration::types::TerminalMode;
use crate::container_management::runtime::ContainerRuntime;
use crate::error_handling::types::TerminalError;
use crate::terminal_management::pipe_process::PipeLauncher;
use crate::terminal_management::pty_process::PtyLauncher;
use crate::terminal_management::types::{LaunchSpec, ProcessEvent, ProcessMode};

/// Receiving end of a process's output and exit notification.
pub type ProcessEvents = mpsc::UnboundedReceiver<ProcessEvent>;

/// A running interactive shell. Output arrives on the [`ProcessEvents`] channel
/// returned at launch.
pub trait InteractiveProcess: Send + Sync {
    /// Queues bytes for the shell's input. Never blocks.
    fn write(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// Best effort; pipe-backed processes ignore it.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError>;

    fn kill(&self);

    fn mode(&self) -> ProcessMode;
}

/// Starts interactive shells inside containers.
///
/// `launch` may block (opening a PTY, forking) and is called off the async executor.
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Arc<dyn InteractiveProcess>, ProcessEvents), TerminalError>;
}

/// Tries a native PTY first and falls back to plain pipes.
pub struct AutoLauncher {
    pty: PtyLauncher,
    pipe: PipeLauncher,
}

impl AutoLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            pty: PtyLauncher::new(runtime.clone()),
            pipe: PipeLauncher::new(runtime),
        }
    }
}

impl ProcessLauncher for AutoLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Arc<dyn InteractiveProcess>, ProcessEvents), TerminalError> {
        match self.pty.launch(spec) {
            Ok(launched) => Ok(launched),
            Err(e) => {
                warn!(
                    "PTY unavailable for {} ({}), falling back to pipe mode",
                    spec.container_name, e
                );
                self.pipe.launch(spec)
            }
        }
    }
}

pub fn launcher_for(mode: TerminalMode, runtime: Arc<dyn ContainerRuntime>) -> Arc<dyn ProcessLauncher> {
    match mode {
        TerminalMode::Auto => Arc::new(AutoLauncher::new(runtime)),
        TerminalMode::Pty => Arc::new(PtyLauncher::new(runtime)),
        TerminalMode::Pipe => Arc::new(PipeLauncher::new(runtime)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::container_management::fake_runtime::FakeRuntime;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(10);

    pub(crate) fn local_runtime() -> Arc<dyn ContainerRuntime> {
        Arc::new(FakeRuntime::local_shell())
    }

    pub(crate) fn sh_spec() -> LaunchSpec {
        LaunchSpec {
            container_name: "user_local".to_string(),
            shell: "sh".to_string(),
            cols: 80,
            rows: 24,
        }
    }

    /// Collects output until `needle` shows up.
    pub(crate) async fn read_until(events: &mut ProcessEvents, needle: &str) -> String {
        let mut output = String::new();
        timeout(WAIT, async {
            while !output.contains(needle) {
                match events.recv().await {
                    Some(ProcessEvent::Data(bytes)) => {
                        output.push_str(&String::from_utf8_lossy(&bytes))
                    }
                    other => panic!("no {:?} before {:?}, got {:?}", needle, other, output),
                }
            }
        })
        .await
        .expect("timed out waiting for shell output");
        output
    }

    /// Skips remaining output and returns the exit code.
    pub(crate) async fn exit_code(events: &mut ProcessEvents) -> Option<i32> {
        timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(ProcessEvent::Exit(code)) => return code,
                    Some(ProcessEvent::Data(_)) => {}
                    None => panic!("event stream closed without an exit"),
                }
            }
        })
        .await
        .expect("timed out waiting for the shell to exit")
    }

    /// The arithmetic keeps the expected text out of a terminal's input echo.
    pub(crate) async fn assert_echo_then_clean_exit(launcher: &dyn ProcessLauncher) {
        let (process, mut events) = launcher.launch(&sh_spec()).unwrap();
        process.write(b"echo $((40 + 2))\n").unwrap();
        read_until(&mut events, "42").await;

        process.write(b"exit\n").unwrap();
        assert_eq!(exit_code(&mut events).await, Some(0));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn auto_launcher_runs_a_shell() {
        assert_echo_then_clean_exit(&AutoLauncher::new(local_runtime())).await;
    }

    #[tokio::test]
    async fn auto_launcher_prefers_a_pty() {
        let (process, _events) = AutoLauncher::new(local_runtime())
            .launch(&sh_spec())
            .unwrap();
        assert_eq!(process.mode(), ProcessMode::Pty);
        process.kill();
    }

    #[tokio::test]
    async fn launcher_for_honours_the_configured_mode() {
        let pipe = launcher_for(TerminalMode::Pipe, local_runtime());
        let (process, mut events) = pipe.launch(&sh_spec()).unwrap();
        assert_eq!(process.mode(), ProcessMode::Pipe);
        process.kill();
        exit_code(&mut events).await;
    }
}
