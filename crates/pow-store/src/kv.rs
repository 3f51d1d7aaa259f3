//! # Key-Value Backends
//!
//! All stores sit on a [`Datastore`]: a flat, ordered namespace of string
//! keys to byte values with prefix scans and atomic batches. Two backends:
//!
//! - [`RedbDatastore`] persists to a single redb file. Every write commits
//!   a redb transaction, so a returned `Ok` is durable.
//! - [`MemDatastore`] keeps everything in a `BTreeMap` for tests and the
//!   devnet.
//!
//! Values are JSON; [`get_json`] and [`put_json`] wrap the codec.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// One write of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Ordered key-value storage.
///
/// Implementations must be safe for concurrent use. Prefix scans return
/// entries in ascending key order.
pub trait Datastore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, ascending.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Apply every op or none.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
}

// ─── redb ────────────────────────────────────────────────────────────

/// redb-backed datastore.
#[derive(Clone)]
pub struct RedbDatastore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDatastore").finish_non_exhaustive()
    }
}

impl RedbDatastore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;
        let tx = db.begin_write()?;
        {
            tx.open_table(KV_TABLE)?;
        }
        tx.commit()?;
        tracing::debug!(path = %path.as_ref().display(), "opened redb datastore");
        Ok(Self { db: Arc::new(db) })
    }
}

impl Datastore for RedbDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(KV_TABLE)?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV_TABLE)?;
            table.remove(key)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(KV_TABLE)?;
        let mut out = Vec::new();
        for item in table.range(prefix..)? {
            let (k, v) = item?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_string(), v.value().to_vec()));
        }
        Ok(out)
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV_TABLE)?;
            for op in &ops {
                match op {
                    BatchOp::Put(k, v) => {
                        table.insert(k.as_str(), v.as_slice())?;
                    }
                    BatchOp::Delete(k) => {
                        table.remove(k.as_str())?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ─── In-memory ───────────────────────────────────────────────────────

/// In-memory datastore. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemDatastore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Datastore for MemDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let guard = self.data.read();
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        for op in ops {
            match op {
                BatchOp::Put(k, v) => {
                    guard.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    guard.remove(&k);
                }
            }
        }
        Ok(())
    }
}

// ─── JSON helpers ────────────────────────────────────────────────────

/// Read and decode a JSON value.
pub fn get_json<T: DeserializeOwned>(
    ds: &dyn Datastore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match ds.get(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub fn put_json<T: Serialize>(ds: &dyn Datastore, key: &str, value: &T) -> Result<(), StoreError> {
    let bytes = encode(key, value)?;
    ds.put(key, &bytes)
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

/// Zero-padded nanosecond timestamp that sorts lexicographically.
pub(crate) fn ts_key(nanos: i64) -> String {
    format!("{:020}", nanos.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(ds: &dyn Datastore) {
        ds.put("a/1", b"one").unwrap();
        ds.put("a/2", b"two").unwrap();
        ds.put("b/1", b"other").unwrap();
        assert_eq!(ds.get("a/1").unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(ds.get("missing").unwrap(), None);

        let scanned: Vec<String> = ds
            .scan_prefix("a/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(scanned, vec!["a/1".to_string(), "a/2".to_string()]);

        ds.batch(vec![
            BatchOp::Delete("a/1".into()),
            BatchOp::Put("a/3".into(), b"three".to_vec()),
        ])
        .unwrap();
        assert_eq!(ds.get("a/1").unwrap(), None);
        assert_eq!(ds.scan_prefix("a/").unwrap().len(), 2);

        ds.delete("a/3").unwrap();
        assert_eq!(ds.scan_prefix("a/").unwrap().len(), 1);
    }

    #[test]
    fn mem_datastore_basics() {
        exercise(&MemDatastore::new());
    }

    #[test]
    fn redb_datastore_basics() {
        let dir = tempfile::tempdir().unwrap();
        let ds = RedbDatastore::open(dir.path().join("pow.redb")).unwrap();
        exercise(&ds);
    }

    #[test]
    fn redb_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pow.redb");
        {
            let ds = RedbDatastore::open(&path).unwrap();
            put_json(&ds, "k", &vec![1u32, 2, 3]).unwrap();
        }
        let ds = RedbDatastore::open(&path).unwrap();
        let v: Option<Vec<u32>> = get_json(&ds, "k").unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[test]
    fn decode_error_names_key() {
        let ds = MemDatastore::new();
        ds.put("bad", b"not json").unwrap();
        let err = get_json::<u32>(&ds, "bad").unwrap_err();
        assert!(err.to_string().contains("'bad'"));
    }

    #[test]
    fn ts_key_sorts_numerically() {
        assert!(ts_key(9) < ts_key(10));
        assert!(ts_key(1_700_000_000_000_000_000) > ts_key(999));
        assert_eq!(ts_key(-5), ts_key(0));
    }
}
