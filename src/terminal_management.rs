//! Terminal Session Multiplexer.
//!
//! Interactive shells inside user containers, several per connection. Processes
//! are started through a [`ProcessLauncher`]: a native PTY ([`PtyLauncher`]), plain
//! pipes ([`PipeLauncher`]), or PTY with pipe fallback ([`AutoLauncher`]).

#[cfg(test)]
pub mod fake_process;
pub mod multiplexer;
pub mod pipe_process;
pub mod process;
pub mod pty_process;
pub mod types;

pub use multiplexer::TerminalMultiplexer;
pub use pipe_process::PipeLauncher;
pub use process::{launcher_for, AutoLauncher, InteractiveProcess, ProcessLauncher};
pub use pty_process::PtyLauncher;
pub use types::{ConnectionId, TerminalEvent, TerminalSink, TerminalSummary, DEFAULT_TERMINAL_ID};
