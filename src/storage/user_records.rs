use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::{UserId, UserRecord};

type Slot = Arc<AsyncMutex<Option<UserRecord>>>;

/// Process-wide table of user records with one lock per user id.
///
/// Holding a [`RecordGuard`] serializes every read-modify-write on that user's
/// record; distinct users never contend. Mutations go to the backing store before
/// the in-memory copy changes, so a failed write leaves the table untouched.
pub struct UserRecordTable {
    store: Arc<dyn RecordStore>,
    slots: Mutex<HashMap<UserId, Slot>>,
}

impl UserRecordTable {
    pub fn load(store: Arc<dyn RecordStore>) -> Result<Self, StorageError> {
        let records = store.load_all()?;
        info!("Loaded {} user record(s)", records.len());

        let slots = records
            .into_iter()
            .map(|(user_id, record)| (user_id, Arc::new(AsyncMutex::new(Some(record)))))
            .collect();

        Ok(Self {
            store,
            slots: Mutex::new(slots),
        })
    }

    fn slot(&self, user_id: &UserId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Waits for exclusive access to `user_id`'s record.
    pub async fn lock(&self, user_id: &UserId) -> RecordGuard {
        let slot = self.slot(user_id).lock_owned().await;
        RecordGuard {
            user_id: user_id.clone(),
            slot,
            store: self.store.clone(),
        }
    }

    pub async fn get(&self, user_id: &UserId) -> Option<UserRecord> {
        self.lock(user_id).await.record().cloned()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.keys().cloned().collect()
    }

    /// Copies every present record, taking each user's lock in turn.
    pub async fn snapshot(&self) -> Vec<(UserId, UserRecord)> {
        let mut out = Vec::new();
        for user_id in self.user_ids() {
            if let Some(record) = self.get(&user_id).await {
                out.push((user_id, record));
            }
        }
        out
    }
}

/// Exclusive handle on one user's record.
pub struct RecordGuard {
    user_id: UserId,
    slot: OwnedMutexGuard<Option<UserRecord>>,
    store: Arc<dyn RecordStore>,
}

impl RecordGuard {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn record(&self) -> Option<&UserRecord> {
        self.slot.as_ref()
    }

    pub fn put(&mut self, record: UserRecord) -> Result<(), StorageError> {
        self.store.save(&self.user_id, &record)?;
        debug!("Stored record for user {}", self.user_id);
        *self.slot = Some(record);
        Ok(())
    }

    /// Applies `f` to a copy of the record and writes it through.
    /// Returns `Ok(false)` when the user has no record.
    pub fn update<F>(&mut self, f: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut record = match self.slot.as_ref() {
            Some(record) => record.clone(),
            None => return Ok(false),
        };
        f(&mut record);
        if self.slot.as_ref() == Some(&record) {
            return Ok(true);
        }
        self.put(record)?;
        Ok(true)
    }

    pub fn remove(&mut self) -> Result<Option<UserRecord>, StorageError> {
        if self.slot.is_none() {
            return Ok(None);
        }
        self.store.remove(&self.user_id)?;
        debug!("Removed record for user {}", self.user_id);
        Ok(self.slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_storage::JsonFileStore;
    use crate::storage::types::PortRange;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> UserRecordTable {
        let store = JsonFileStore::new(dir.path().join("userPorts.json")).unwrap();
        UserRecordTable::load(Arc::new(store)).unwrap()
    }

    fn record(name: &str) -> UserRecord {
        UserRecord::new(
            name.to_string(),
            PathBuf::from("/w"),
            PortRange::new(4000, 4009),
        )
    }

    #[tokio::test]
    async fn put_is_written_through_to_the_store() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("a");
        {
            let t = table(&dir);
            t.lock(&user).await.put(record("user_a")).unwrap();
        }
        let reloaded = table(&dir);
        assert_eq!(reloaded.get(&user).await.unwrap().container_name, "user_a");
        assert_eq!(reloaded.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn update_without_record_reports_false() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let mut guard = t.lock(&UserId::new("nobody")).await;
        assert!(!guard.update(|r| r.active_ports.push(1)).unwrap());
        assert!(guard.remove().unwrap().is_none());
    }

    #[tokio::test]
    async fn update_and_remove() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let user = UserId::new("a");
        let mut guard = t.lock(&user).await;
        guard.put(record("user_a")).unwrap();
        assert!(guard.update(|r| r.active_ports = vec![3000]).unwrap());
        assert_eq!(guard.record().unwrap().active_ports, vec![3000]);
        assert_eq!(guard.remove().unwrap().unwrap().container_name, "user_a");
        drop(guard);
        assert!(t.get(&user).await.is_none());
    }

    #[tokio::test]
    async fn lock_serializes_same_user() {
        let dir = TempDir::new().unwrap();
        let t = Arc::new(table(&dir));
        let user = UserId::new("a");

        let guard = t.lock(&user).await;
        let t2 = t.clone();
        let u2 = user.clone();
        let waiter = tokio::spawn(async move { t2.lock(&u2).await.record().is_some() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // another user is not blocked
        let other = t.lock(&UserId::new("b")).await;
        drop(other);

        let mut guard = guard;
        guard.put(record("user_a")).unwrap();
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
