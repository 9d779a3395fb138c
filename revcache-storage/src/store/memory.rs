//! In-memory store.
//!
//! Shares state between every handle cloned from it, so several datasets
//! built on clones of one `MemoryStore` behave like independent processes
//! talking to the same server.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use revcache_core::StoreError;

use super::{encode_counter, next_counter, BatchOp, BatchResult, KvStore};

/// In-memory key-value store for tests and single-host embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns true if `key` currently holds a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.write();
        let next = next_counter(key, entries.get(key).map(Vec::as_slice))?;
        entries.insert(key.to_string(), encode_counter(next));
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn atomic_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError> {
        let mut entries = self.entries.write();

        // Stage every op against an overlay first; nothing is applied unless
        // the whole batch succeeds.
        let mut staged: HashMap<&str, Option<Vec<u8>>> = HashMap::new();
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            let key = op.key();
            let current = match staged.get(key) {
                Some(value) => value.clone(),
                None => entries.get(key).cloned(),
            };
            match op {
                BatchOp::Set { value, .. } => {
                    staged.insert(key, Some(value.clone()));
                    results.push(BatchResult::Set);
                }
                BatchOp::Increment { .. } => {
                    let next = next_counter(key, current.as_deref())?;
                    staged.insert(key, Some(encode_counter(next)));
                    results.push(BatchResult::Incremented(next));
                }
                BatchOp::Delete { .. } => {
                    staged.insert(key, None);
                    results.push(BatchResult::Deleted(current.is_some()));
                }
            }
        }

        for (key, value) in staged {
            match value {
                Some(value) => {
                    entries.insert(key.to_string(), value);
                }
                None => {
                    entries.remove(key);
                }
            }
        }

        Ok(results)
    }
}
