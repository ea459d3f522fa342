//! Storage subsystem
//!
//! Durable per-user state: which container belongs to which user, its workspace
//! directory, and its port range and mappings.
//!
//! Components:
//! - `storage_trait`: the `RecordStore` trait defining the durable backend.
//! - `file_storage`: JSON file implementation, rewritten atomically on each change.
//! - `user_records`: the shared in-memory table with per-user locking.
//! - `types`: record and identifier types shared with the other subsystems.

pub mod file_storage;
pub mod storage_trait;
pub mod types;
pub mod user_records;

pub use file_storage::JsonFileStore;
pub use storage_trait::RecordStore;
pub use types::{PortRange, UserId, UserRecord};
pub use user_records::{RecordGuard, UserRecordTable};
