use log::{debug, trace};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;

use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::AttachMode;
use crate::error_handling::types::TerminalError;
use crate::terminal_management::process::{InteractiveProcess, ProcessEvents, ProcessLauncher};
use crate::terminal_management::types::{LaunchSpec, ProcessEvent, ProcessMode};

const READ_BUFFER_SIZE: usize = 4096;

/// Attaches shells through a native pseudo-terminal.
pub struct PtyLauncher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl PtyLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

/// Shell attached through a PTY. Reading and writing happen on dedicated threads.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    input: Mutex<std_mpsc::Sender<Vec<u8>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl ProcessLauncher for PtyLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Arc<dyn InteractiveProcess>, ProcessEvents), TerminalError> {
        let argv = self
            .runtime
            .attach_command(&spec.container_name, &spec.shell, AttachMode::Tty);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TerminalError::SpawnFailed("empty attach command".to_string()))?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to spawn process: {}", e)))?;
        // the child owns the slave side now; keeping ours open would hide EOF
        drop(pair.slave);

        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to clone PTY reader: {}", e)))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to get PTY writer: {}", e)))?;

        let (input_tx, input_rx) = std_mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name(format!("pty-in-{}", spec.container_name))
            .spawn(move || {
                for chunk in input_rx {
                    if writer.write_all(&chunk).and_then(|_| writer.flush()).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to start PTY writer: {}", e)))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let name = spec.container_name.clone();
        thread::Builder::new()
            .name(format!("pty-out-{}", spec.container_name))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            trace!("PTY {} produced {} byte(s)", name, n);
                            if events_tx.send(ProcessEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        // EIO once the child side is gone
                        Err(_) => break,
                    }
                }
                let code = child.wait().ok().map(|status| status.exit_code() as i32);
                debug!("PTY process in {} exited with {:?}", name, code);
                let _ = events_tx.send(ProcessEvent::Exit(code));
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to start PTY reader: {}", e)))?;

        let process = PtyProcess {
            master: Mutex::new(pair.master),
            input: Mutex::new(input_tx),
            killer: Mutex::new(killer),
        };
        Ok((Arc::new(process), events_rx))
    }
}

impl InteractiveProcess for PtyProcess {
    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        let input = self
            .input
            .lock()
            .map_err(|_| TerminalError::IoError("PTY input lock poisoned".to_string()))?;
        input
            .send(data.to_vec())
            .map_err(|_| TerminalError::IoError("PTY input closed".to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let master = self
            .master
            .lock()
            .map_err(|_| TerminalError::IoError("PTY lock poisoned".to_string()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::IoError(e.to_string()))
    }

    fn kill(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            if let Err(e) = killer.kill() {
                debug!("Killing PTY process failed: {}", e);
            }
        }
    }

    fn mode(&self) -> ProcessMode {
        ProcessMode::Pty
    }
}
