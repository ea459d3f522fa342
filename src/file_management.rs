//! Filesystem Bridge.
//!
//! The tree is always read from the live container ([`TreeBuilder`]) while edits go
//! straight to the bind-mounted host directory ([`file_bridge`]). Terminal input is
//! watched by a [`CommandTracker`] to refresh the tree after structural commands.

pub mod command_tracker;
pub mod file_bridge;
pub mod file_tree;
pub mod types;

pub use command_tracker::{triggers_refresh, CommandTracker};
pub use file_tree::TreeBuilder;
pub use types::{EntryKind, FileTree};
