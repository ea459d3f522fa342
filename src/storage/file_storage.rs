use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::{UserId, UserRecord};

/// Single JSON document holding every user record, keyed by user id.
///
/// The whole document is rewritten on each mutation through a temporary file and
/// a rename, so a crash mid-write leaves the previous version intact.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<UserId, UserRecord>>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create record dir {}: {}", parent.display(), e);
                StorageError::WriteFailed(e.to_string())
            })?;
        }

        let records = Self::read_file(&path)?;
        info!(
            "JsonFileStore initialized at {} with {} record(s)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn read_file(path: &Path) -> Result<BTreeMap<UserId, UserRecord>, StorageError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No record file at {}, starting empty", path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                error!("Failed to read record file {}: {}", path.display(), e);
                return Err(StorageError::ReadFailed(e.to_string()));
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    "Record file {} is corrupt ({}), starting empty",
                    path.display(),
                    e
                );
                Ok(BTreeMap::new())
            }
        }
    }

    fn flush(&self, records: &BTreeMap<UserId, UserRecord>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| {
            error!("Failed to write {}: {}", tmp.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            error!("Failed to replace {}: {}", self.path.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;

        debug!("Flushed {} record(s) to {}", records.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonFileStore {
    fn load_all(&self) -> Result<BTreeMap<UserId, UserRecord>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StorageError::ReadFailed("record lock poisoned".to_string()))?;
        Ok(records.clone())
    }

    fn save(&self, user_id: &UserId, record: &UserRecord) -> Result<(), StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::WriteFailed("record lock poisoned".to_string()))?;
        records.insert(user_id.clone(), record.clone());
        self.flush(&records)
    }

    fn remove(&self, user_id: &UserId) -> Result<(), StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::WriteFailed("record lock poisoned".to_string()))?;
        if records.remove(user_id).is_some() {
            self.flush(&records)?;
        }
        Ok(())
    }
}
