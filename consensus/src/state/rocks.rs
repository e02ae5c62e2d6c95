//! RocksDB-backed document backend
//!
//! One column family per collection, each holding a single bincode document.

use std::path::Path;
use std::sync::RwLock;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use super::schema::{keys, ALL_COLLECTIONS};
use super::store::{Codec, DocumentBackend, StoreError, StoreResult};

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// RocksDB document backend
pub struct RocksBackend {
    db: RwLock<DB>,
}

impl RocksBackend {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_COLLECTIONS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;

        Ok(Self { db: RwLock::new(db) })
    }
}

impl DocumentBackend for RocksBackend {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn codec(&self) -> Codec {
        Codec::Bincode
    }

    fn read(&self, collection: &str) -> StoreResult<Option<Vec<u8>>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(collection)
            .ok_or_else(|| StoreError::Backend(format!("column family not found: {collection}")))?;
        Ok(db.get_cf(&cf, keys::DOCUMENT.as_bytes())?)
    }

    fn write(&self, collection: &str, bytes: &[u8]) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(collection)
            .ok_or_else(|| StoreError::Backend(format!("column family not found: {collection}")))?;
        db.put_cf(&cf, keys::DOCUMENT.as_bytes(), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HistoryStore, ThresholdConfig, ValidationOutcome, ValidationStatus};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_rocks_roundtrip_outcomes_and_thresholds() {
        let dir = tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).unwrap();
        let store = HistoryStore::new(Arc::new(backend));

        store
            .append_outcome(&ValidationOutcome::new(82.0, ValidationStatus::Approved, true))
            .unwrap();
        let mut config = ThresholdConfig::default();
        config.roc_auc = Some(0.93);
        store.save_thresholds(&config).unwrap();

        assert_eq!(store.load_outcomes().unwrap().len(), 1);
        assert_eq!(store.load_thresholds().unwrap().unwrap().roc_auc, Some(0.93));
    }
}
