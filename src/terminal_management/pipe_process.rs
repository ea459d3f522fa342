use log::{debug, trace};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::AttachMode;
use crate::error_handling::types::TerminalError;
use crate::terminal_management::process::{InteractiveProcess, ProcessEvents, ProcessLauncher};
use crate::terminal_management::types::{LaunchSpec, ProcessEvent, ProcessMode};

/// Attaches shells through plain stdin/stdout pipes, for hosts without PTY support.
///
/// There is no line discipline: carriage returns typed by the user are turned into
/// newlines so the shell still sees complete lines, and stderr is merged into the
/// output stream.
pub struct PipeLauncher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl PipeLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

pub struct PipeProcess {
    input: mpsc::UnboundedSender<Vec<u8>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

fn translate_input(data: &[u8]) -> Vec<u8> {
    data.iter()
        .map(|b| if *b == b'\r' { b'\n' } else { *b })
        .collect()
}

async fn pump<R>(mut stream: R, events: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                trace!("Pipe produced {} byte(s)", n);
                if events.send(ProcessEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

impl ProcessLauncher for PipeLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Arc<dyn InteractiveProcess>, ProcessEvents), TerminalError> {
        let argv = self
            .runtime
            .attach_command(&spec.container_name, &spec.shell, AttachMode::Pipe);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TerminalError::SpawnFailed("empty attach command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to spawn {}: {}", program, e)))?;

        let (mut stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => {
                return Err(TerminalError::SpawnFailed(
                    "child stdio was not captured".to_string(),
                ))
            }
        };

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(chunk) = input_rx.recv().await {
                if stdin.write_all(&chunk).await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let name = spec.container_name.clone();
        tokio::spawn(async move {
            let out = tokio::spawn(pump(stdout, events_tx.clone()));
            let err = tokio::spawn(pump(stderr, events_tx.clone()));

            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            let _ = out.await;
            let _ = err.await;

            let code = status.and_then(|s| s.code());
            debug!("Pipe process in {} exited with {:?}", name, code);
            let _ = events_tx.send(ProcessEvent::Exit(code));
        });

        let process = PipeProcess {
            input: input_tx,
            kill: Mutex::new(Some(kill_tx)),
        };
        Ok((Arc::new(process), events_rx))
    }
}

impl InteractiveProcess for PipeProcess {
    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.input
            .send(translate_input(data))
            .map_err(|_| TerminalError::IoError("pipe input closed".to_string()))
    }

    fn resize(&self, _cols: u16, _rows: u16) -> Result<(), TerminalError> {
        Ok(())
    }

    fn kill(&self) {
        if let Ok(mut kill) = self.kill.lock() {
            if let Some(tx) = kill.take() {
                let _ = tx.send(());
            }
        }
    }

    fn mode(&self) -> ProcessMode {
        ProcessMode::Pipe
    }
}
