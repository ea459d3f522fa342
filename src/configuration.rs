//! Service configuration: TOML file sections, defaults and validation.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::TerminalMode;
