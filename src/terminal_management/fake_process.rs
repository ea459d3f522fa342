//! Scripted [`ProcessLauncher`] for tests: records input, lets tests push output and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error_handling::types::TerminalError;
use crate::terminal_management::process::{InteractiveProcess, ProcessEvents, ProcessLauncher};
use crate::terminal_management::types::{LaunchSpec, ProcessEvent, ProcessMode};

pub struct FakeProcess {
    pub spec: LaunchSpec,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<(u16, u16)>>,
    killed: AtomicBool,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl FakeProcess {
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
    }

    pub fn sizes(&self) -> Vec<(u16, u16)> {
        self.sizes.lock().unwrap().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn emit(&self, bytes: &[u8]) {
        let _ = self.events.send(ProcessEvent::Data(bytes.to_vec()));
    }

    pub fn exit(&self, code: i32) {
        let _ = self.events.send(ProcessEvent::Exit(Some(code)));
    }
}

impl InteractiveProcess for FakeProcess {
    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.is_killed() {
            return Err(TerminalError::IoError("process killed".to_string()));
        }
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.sizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    fn kill(&self) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ProcessEvent::Exit(None));
        }
    }

    fn mode(&self) -> ProcessMode {
        ProcessMode::Pipe
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<Arc<FakeProcess>>>,
    fail_next: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcess> {
        self.launched.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<FakeProcess> {
        self.launched.lock().unwrap().last().cloned().unwrap()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Arc<dyn InteractiveProcess>, ProcessEvents), TerminalError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TerminalError::SpawnFailed("no such container".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let process = Arc::new(FakeProcess {
            spec: spec.clone(),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
            events: tx,
        });
        self.launched.lock().unwrap().push(process.clone());
        Ok((process, rx))
    }
}
