/// Reconstructs command lines from the raw keystrokes a user sends to a terminal.
///
/// Only user input is fed in, never the setup keystrokes the multiplexer writes,
/// so tracked commands are always the user's own.
#[derive(Debug, Default)]
pub struct CommandTracker {
    line: String,
    escape: Escape,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    Start,
    Csi,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk of input and returns the commands it completed, trimmed.
    pub fn feed(&mut self, input: &str) -> Vec<String> {
        let mut completed = Vec::new();

        for c in input.chars() {
            match self.escape {
                Escape::Start => {
                    self.escape = if c == '[' { Escape::Csi } else { Escape::None };
                    continue;
                }
                Escape::Csi => {
                    if ('@'..='~').contains(&c) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::None => {}
            }

            match c {
                '\r' | '\n' => {
                    let command = self.line.trim();
                    if !command.is_empty() {
                        completed.push(command.to_string());
                    }
                    self.line.clear();
                }
                '\u{7f}' | '\u{8}' => {
                    self.line.pop();
                }
                // ctrl-c abandons the line
                '\u{3}' => self.line.clear(),
                '\u{1b}' => self.escape = Escape::Start,
                c if c.is_control() => {}
                c => self.line.push(c),
            }
        }

        completed
    }

    pub fn pending(&self) -> &str {
        &self.line
    }
}

/// Whether a completed command likely changed the workspace structure.
pub fn triggers_refresh(command: &str, refresh_commands: &[String]) -> bool {
    command
        .split_whitespace()
        .next()
        .map(|first| refresh_commands.iter().any(|c| c == first))
        .unwrap_or(false)
}
