//! RocksDB storage layer shared by the ledger and player tables

use crate::{config::StorageConfig, errors::StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{path::Path, sync::Arc};

#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn open_with_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open(&config.data_directory)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply puts and deletes in one atomic batch.
    pub fn write(&self, puts: &[(Vec<u8>, Vec<u8>)], deletes: &[Vec<u8>]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for key in deletes {
            batch.delete(key);
        }
        for (key, value) in puts {
            batch.put(key, value);
        }
        self.db.write(batch).map_err(StorageError::from)
    }

    /// Key/value pairs under `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_write_and_prefix_scan() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .write(
                &[
                    (b"ledger:a:1".to_vec(), b"one".to_vec()),
                    (b"ledger:a:2".to_vec(), b"two".to_vec()),
                    (b"ledger:b:1".to_vec(), b"other".to_vec()),
                ],
                &[],
            )
            .unwrap();

        let rows = storage.scan_prefix(b"ledger:a:", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, b"two".to_vec());
        assert_eq!(storage.scan_prefix(b"ledger:a:", 1).unwrap().len(), 1);

        storage.write(&[], &[b"ledger:a:1".to_vec()]).unwrap();
        assert!(!storage.contains(b"ledger:a:1").unwrap());
        assert!(storage.contains(b"ledger:a:2").unwrap());
    }
}
