//! Shared key-value store abstraction.
//!
//! Datasets only ever talk to the store through [`KvStore`]: point reads and
//! writes, an atomic counter increment, deletes, and an all-or-nothing batch.
//! Implementations must give linearizable reads and writes per key.

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;

use std::sync::Arc;

use revcache_core::StoreError;

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: String, value: Vec<u8> },
    Increment { key: String },
    Delete { key: String },
}

impl BatchOp {
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Set {
            key: key.into(),
            value,
        }
    }

    pub fn increment(key: impl Into<String>) -> Self {
        Self::Increment { key: key.into() }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Increment { key } | Self::Delete { key } => key,
        }
    }
}

/// Result of one batch operation, in the same position as its [`BatchOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchResult {
    Set,
    /// Counter value after the increment.
    Incremented(i64),
    /// Whether a value was present and removed.
    Deleted(bool),
}

impl BatchResult {
    /// The post-increment counter, if this was an increment.
    pub fn counter(&self) -> Option<i64> {
        match self {
            Self::Incremented(value) => Some(*value),
            _ => None,
        }
    }
}

/// Backing store shared by every process synchronizing a dataset.
///
/// # Counters
///
/// Counters are kept as ASCII decimal integers, so a value written by
/// [`KvStore::increment`] can be read back with [`KvStore::get`] and parsed.
/// Incrementing an absent key creates it at 1.
pub trait KvStore: Send + Sync {
    /// Point read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Point write, replacing any prior value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Atomically increment the counter at `key`, returning the new value.
    fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Remove `key`. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Execute `ops` as one indivisible unit.
    ///
    /// Either every operation is applied or none is. Results are returned
    /// in the order of `ops`.
    fn atomic_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn increment(&self, key: &str) -> Result<i64, StoreError> {
        (**self).increment(key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn atomic_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError> {
        (**self).atomic_batch(ops)
    }
}

/// Compute the counter value following `current`.
///
/// Shared by the store implementations so they agree on counter encoding.
pub(crate) fn next_counter(key: &str, current: Option<&[u8]>) -> Result<i64, StoreError> {
    let not_an_integer = || StoreError::NotAnInteger {
        key: key.to_string(),
    };
    let value = match current {
        None => 0,
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
            .ok_or_else(not_an_integer)?,
    };
    value.checked_add(1).ok_or_else(not_an_integer)
}

pub(crate) fn encode_counter(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}
