//! In-memory persistence adapter.
//!
//! Implements [`PersistencePort`] over a namespaced key/blob map.  Records
//! are postcard-encoded exactly as a flash-backed store would write them,
//! so decode failures surface as [`PersistenceError::Corrupted`] here too.
//!
//! Clones share the same map: a test can keep one handle and box another
//! into the service, then inspect what the service wrote.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::app::ports::{FeedingRecord, PersistenceError, PersistencePort};

const FEEDING_NAMESPACE: &str = "terrarium";
const FEEDING_KEY: &str = "feeding";

/// Largest blob a single key may hold.
pub const MAX_BLOB_SIZE: usize = 4000;

#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("MemoryStore: simulation backend");
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.blobs().get(&Self::composite_key(namespace, key)).cloned()
    }

    pub fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(PersistenceError::Full);
        }
        self.blobs().insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    pub fn delete(&self, namespace: &str, key: &str) {
        self.blobs().remove(&Self::composite_key(namespace, key));
    }

    /// Raw feeding blob, for tests that corrupt or inspect it.
    pub fn feeding_blob(&self) -> Option<Vec<u8>> {
        self.read(FEEDING_NAMESPACE, FEEDING_KEY)
    }

    pub fn put_feeding_blob(&self, data: &[u8]) -> Result<(), PersistenceError> {
        self.write(FEEDING_NAMESPACE, FEEDING_KEY, data)
    }
}

impl PersistencePort for MemoryStore {
    fn load_feeding(&self) -> Result<Option<FeedingRecord>, PersistenceError> {
        match self.feeding_blob() {
            Some(bytes) => {
                let record: FeedingRecord =
                    postcard::from_bytes(&bytes).map_err(|_| PersistenceError::Corrupted)?;
                debug!("MemoryStore: loaded feeding record");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn save_feeding(&mut self, record: &FeedingRecord) -> Result<(), PersistenceError> {
        let bytes = postcard::to_allocvec(record).map_err(|_| PersistenceError::Io)?;
        self.put_feeding_blob(&bytes)?;
        debug!("MemoryStore: feeding record saved ({} bytes)", bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CalendarDate;

    #[test]
    fn empty_store_loads_none() {
        let store = MemoryStore::new();
        assert_eq!(store.load_feeding(), Ok(None));
    }

    #[test]
    fn record_survives_through_a_shared_handle() {
        let reader = MemoryStore::new();
        let mut writer = reader.clone();
        let date = CalendarDate::from_ymd_opt(2024, 3, 9).unwrap();
        let record = FeedingRecord {
            last_feeding_date: Some(date),
            daily_count: 2,
            count_date: Some(date),
        };
        writer.save_feeding(&record).unwrap();
        assert_eq!(reader.load_feeding(), Ok(Some(record)));
    }

    #[test]
    fn garbage_blob_reports_corruption() {
        let store = MemoryStore::new();
        store.put_feeding_blob(&[0xff, 0xff, 0xff]).unwrap();
        assert_eq!(store.load_feeding(), Err(PersistenceError::Corrupted));
    }

    #[test]
    fn oversized_blob_refused() {
        let store = MemoryStore::new();
        let big = vec![0u8; MAX_BLOB_SIZE + 1];
        assert_eq!(store.write("x", "y", &big), Err(PersistenceError::Full));
        store.write("x", "y", &big[..10]).unwrap();
        store.delete("x", "y");
        assert!(store.read("x", "y").is_none());
    }
}
