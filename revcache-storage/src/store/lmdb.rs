//! LMDB-backed shared store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep dataset payloads
//! and revision counters in a memory-mapped environment on disk.
//!
//! # Sharing Between Processes
//!
//! LMDB environments are safe to open from several processes at once, so
//! every process on a host that points an `LmdbStore` at the same directory
//! sees the same namespaces and the same revision counters. Within one
//! process, clone the store instead of opening the directory twice: heed
//! refuses to open an environment that is already open.
//!
//! # Thread Safety
//!
//! - Read transactions for `get`
//! - One write transaction per `set`, `increment`, `delete`
//! - One write transaction for a whole `atomic_batch`; an error before
//!   commit aborts the transaction so nothing in the batch is applied

use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use revcache_core::{CacheError, ConfigError, LmdbStoreConfig, StoreError};

use super::{encode_counter, next_counter, BatchOp, BatchResult, KvStore};

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for CacheError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Config(config) => CacheError::Config(config),
            other => CacheError::Store(StoreError::Unavailable {
                reason: other.to_string(),
            }),
        }
    }
}

/// Key-value store kept in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// use revcache_core::LmdbStoreConfig;
/// use revcache_storage::LmdbStore;
///
/// let store = LmdbStore::open(&LmdbStoreConfig::new("/var/lib/revcache"))?;
/// let prices = SyncedDataset::new(Arc::new(store), namespace, loader, SyncConfig::default());
/// ```
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStore {
    /// Open (creating if needed) the store described by `config`.
    pub fn open(config: &LmdbStoreConfig) -> Result<Self, LmdbStoreError> {
        config.validate()?;
        Self::open_path(&config.path, config.map_size_mb)
    }

    /// Open (creating if needed) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open_path<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = map_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: map_size_mb.to_string(),
                reason: "map size in bytes overflows usize".to_string(),
            })?;
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn write_txn(&self, key: &str) -> Result<RwTxn<'_>, StoreError> {
        self.env.write_txn().map_err(|e| backend(key, e))
    }

    /// Apply one batch op inside an open write transaction.
    fn apply(&self, wtxn: &mut RwTxn<'_>, op: &BatchOp) -> Result<BatchResult, StoreError> {
        let key = op.key();
        match op {
            BatchOp::Set { value, .. } => {
                self.db.put(wtxn, key, value).map_err(|e| backend(key, e))?;
                Ok(BatchResult::Set)
            }
            BatchOp::Increment { .. } => {
                let next = {
                    let current = self.db.get(wtxn, key).map_err(|e| backend(key, e))?;
                    next_counter(key, current)?
                };
                self.db
                    .put(wtxn, key, &encode_counter(next))
                    .map_err(|e| backend(key, e))?;
                Ok(BatchResult::Incremented(next))
            }
            BatchOp::Delete { .. } => {
                let deleted = self.db.delete(wtxn, key).map_err(|e| backend(key, e))?;
                Ok(BatchResult::Deleted(deleted))
            }
        }
    }

    /// Run `ops` in one write transaction, committing only if all succeed.
    fn run_in_txn(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError> {
        let first_key = ops.first().map(BatchOp::key).unwrap_or_default();
        let mut wtxn = self.write_txn(first_key)?;

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            // Dropping `wtxn` on the error path aborts the transaction.
            results.push(self.apply(&mut wtxn, op)?);
        }

        wtxn.commit().map_err(|e| StoreError::BatchFailed {
            reason: e.to_string(),
        })?;
        Ok(results)
    }
}

fn backend(key: &str, e: heed::Error) -> StoreError {
    StoreError::Backend {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

impl KvStore for LmdbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| backend(key, e))?;
        let value = self.db.get(&rtxn, key).map_err(|e| backend(key, e))?;
        Ok(value.map(<[u8]>::to_vec))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.run_in_txn(&[BatchOp::set(key, value.to_vec())])
            .map(|_| ())
    }

    fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let results = self.run_in_txn(&[BatchOp::increment(key)])?;
        results
            .first()
            .and_then(BatchResult::counter)
            .ok_or_else(|| StoreError::NotAnInteger {
                key: key.to_string(),
            })
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let results = self.run_in_txn(&[BatchOp::delete(key)])?;
        Ok(matches!(results.first(), Some(BatchResult::Deleted(true))))
    }

    fn atomic_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError> {
        self.run_in_txn(ops)
    }
}
