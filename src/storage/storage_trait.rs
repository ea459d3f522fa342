//! Record Store Trait
//!
//! This module defines the `RecordStore` trait, the durable backend behind the
//! per-user record table.
//!
//! Implementors are responsible for persisting one `UserRecord` per stable user id
//! so that a restarted process can rediscover containers and port ranges.

use crate::error_handling::types::StorageError;
use crate::storage::types::{UserId, UserRecord};
use std::collections::BTreeMap;

/// Durable key-value store of user records keyed by stable user id.
///
/// Every call is synchronous and flushed before returning.
pub trait RecordStore: Send + Sync {
    /// Loads every persisted record.
    fn load_all(&self) -> Result<BTreeMap<UserId, UserRecord>, StorageError>;

    /// Inserts or replaces the record of `user_id`.
    fn save(&self, user_id: &UserId, record: &UserRecord) -> Result<(), StorageError>;

    /// Removes the record of `user_id`. Removing an unknown id is not an error.
    fn remove(&self, user_id: &UserId) -> Result<(), StorageError>;
}
