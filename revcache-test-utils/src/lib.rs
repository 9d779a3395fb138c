//! revcache Test Utilities
//!
//! Shared test infrastructure for the revcache workspace:
//! - A fault-injecting store that counts round trips
//! - A manually advanced clock for deterministic recheck throttling
//! - Loaders that count how often they run
//! - Proptest generators, fixtures and assertions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

// Re-export core types for convenience
pub use revcache_core::{
    CacheError, CacheResult, Clock, ConsistencyError, LoadError, Namespace, Revision, StoreError,
    SyncConfig, Timestamp, ViewError,
};
pub use revcache_storage::{BatchOp, BatchResult, KvStore, MemoryStore};

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// Store wrapper that can be switched offline and counts every round trip.
///
/// Clones share the underlying data, the fault switch and the counter.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    /// Calls still allowed to succeed; `None` means no limit.
    budget: Arc<Mutex<Option<usize>>>,
    round_trips: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store, sharing its data.
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// The wrapped store, bypassing fault injection and counting.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Make every following call fail with [`StoreError::Unavailable`].
    pub fn go_offline(&self) {
        *self.budget.lock() = Some(0);
    }

    /// Let `calls` more calls through, then fail every call after them.
    pub fn go_offline_after(&self, calls: usize) {
        *self.budget.lock() = Some(calls);
    }

    pub fn go_online(&self) {
        *self.budget.lock() = None;
    }

    /// Calls made so far, including failed ones.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    fn contact(&self) -> Result<(), StoreError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        match self.budget.lock().as_mut() {
            Some(0) => Err(StoreError::Unavailable {
                reason: "connection refused".to_string(),
            }),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl KvStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.contact()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.contact()?;
        self.inner.set(key, value)
    }

    fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.contact()?;
        self.inner.increment(key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.contact()?;
        self.inner.delete(key)
    }

    fn atomic_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>, StoreError> {
        self.contact()?;
        self.inner.atomic_batch(ops)
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(chrono::Duration::seconds(secs));
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_else(Utc::now))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

// ============================================================================
// LOADERS
// ============================================================================

/// Loader state shared between a test and the dataset it feeds.
///
/// Serves whatever value was last [`set`](Self::set) and counts loads.
#[derive(Debug, Clone)]
pub struct CountingLoader<T> {
    value: Arc<Mutex<T>>,
    loads: Arc<AtomicUsize>,
}

impl<T> CountingLoader<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change what the next load returns.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// A loader closure reading this shared state.
    pub fn loader(&self) -> impl Fn() -> CacheResult<T> + Send + Sync + 'static {
        let value = Arc::clone(&self.value);
        let loads = Arc::clone(&self.loads);
        move || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(value.lock().clone())
        }
    }
}

/// A loader that always fails with a [`LoadError`].
pub fn failing_loader<T: 'static>(
    source_name: &'static str,
) -> impl Fn() -> CacheResult<T> + Send + Sync + 'static {
    move || Err(LoadError::new(source_name, "upstream unavailable").into())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for revcache types.

    use super::*;
    use proptest::prelude::*;

    /// A valid namespace component (no separator dots, never empty).
    pub fn arb_component() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    pub fn arb_namespace() -> impl Strategy<Value = Namespace> {
        (arb_component(), arb_component()).prop_filter_map("valid namespace", |(name, version)| {
            Namespace::new(name, version).ok()
        })
    }

    pub fn arb_symbol() -> impl Strategy<Value = String> {
        "[A-Z]{1,5}"
    }

    pub fn arb_prices() -> impl Strategy<Value = fixtures::Prices> {
        prop::collection::btree_map(arb_symbol(), 1u32..100_000, 0..20)
    }

    pub fn arb_revision() -> impl Strategy<Value = Revision> {
        (1i64..1_000_000).prop_map(Revision::new)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built datasets and configuration for common scenarios.

    use super::*;
    use std::time::Duration;

    pub type Prices = BTreeMap<String, u32>;

    pub fn prices_namespace() -> Namespace {
        Namespace::new("prices", "v1").expect("fixture namespace is valid")
    }

    pub fn sample_prices() -> Prices {
        BTreeMap::from([
            ("AAPL".to_string(), 190),
            ("GOOG".to_string(), 140),
            ("MSFT".to_string(), 410),
        ])
    }

    /// Staleness check on every read.
    pub fn eager_sync() -> SyncConfig {
        SyncConfig::new().with_recheck_interval(Duration::ZERO)
    }

    pub fn sync_every_secs(secs: u64) -> SyncConfig {
        SyncConfig::new().with_recheck_interval(Duration::from_secs(secs))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for revcache error kinds.

    use super::*;

    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.is_store_unavailable() => {}
            other => panic!("Expected store unavailable, got {:?}", other),
        }
    }

    pub fn assert_consistency_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(
            matches!(result, Err(CacheError::Consistency(_))),
            "Expected Consistency error, got {:?}",
            result
        );
    }

    pub fn assert_view_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(
            matches!(result, Err(CacheError::View(_))),
            "Expected View error, got {:?}",
            result
        );
    }

    pub fn assert_load_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(
            matches!(result, Err(CacheError::Load(_))),
            "Expected Load error, got {:?}",
            result
        );
    }
}
