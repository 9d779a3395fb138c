//! Revision-tracked synchronized datasets.
//!
//! A [`SyncedDataset`] keeps a local snapshot of one shared dataset together
//! with the revision it was taken at. Readers go through a throttled
//! staleness check: at most one revision read per recheck interval, and a
//! full pull only when the store holds a newer (or missing) revision.
//!
//! # Protocol
//!
//! ```text
//! push:  load() -> encode -> [SET data, INCR revision] atomically -> adopt
//! pull:  GET revision -- absent --> push (bootstrap)
//!                     \- present -> GET data -> decode -> adopt
//! purge: [DEL data, DEL revision] atomically -> unsynchronized
//! ```
//!
//! Every step that touches the local revision, snapshot or last-checked
//! stamp runs under one reentrant lock per dataset: the staleness check
//! calls `pull`, and `pull` calls `push` when bootstrapping, all while
//! already holding it.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use revcache_core::{
    CacheError, CacheResult, Clock, Codec, ConsistencyError, JsonCodec, Namespace, Revision,
    StoreError, SyncConfig, SystemClock, Timestamp,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::attach::{AttachedViews, ViewOwner};
use crate::read::SnapshotSource;
use crate::store::{BatchOp, KvStore};
use crate::view::RevisionSource;

/// Produces the authoritative content of a dataset.
///
/// Called by [`SyncedDataset::push`], including the bootstrap push made by
/// the first reader of a namespace nobody has written yet.
pub trait Loader<T>: Send + Sync {
    fn load(&self) -> CacheResult<T>;
}

impl<T, F> Loader<T> for F
where
    F: Fn() -> CacheResult<T> + Send + Sync,
{
    fn load(&self) -> CacheResult<T> {
        self()
    }
}

/// Point-in-time synchronization state of a dataset, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub namespace: Namespace,
    pub revision: Option<Revision>,
    pub last_checked: Option<Timestamp>,
}

impl SyncStatus {
    /// Returns true if the dataset holds a snapshot.
    pub fn is_synchronized(&self) -> bool {
        self.revision.is_some()
    }
}

/// Local state guarded by the dataset lock.
///
/// `snapshot.is_some() == revision.is_some()` at every point the lock is
/// released.
struct SyncState<T> {
    revision: Option<Revision>,
    snapshot: Option<Arc<T>>,
    last_checked: Option<Timestamp>,
}

impl<T> SyncState<T> {
    fn unsynchronized() -> Self {
        Self {
            revision: None,
            snapshot: None,
            last_checked: None,
        }
    }
}

/// Outcome of comparing the local revision with the store.
enum CheckOutcome {
    UpToDate,
    NeedsPull,
    /// The store could not be reached; keep serving the local snapshot.
    Unreachable,
}

/// A named, versioned dataset synchronized through a shared store.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::new());
/// let prices = SyncedDataset::new(
///     store,
///     Namespace::new("prices", "v1")?,
///     || -> CacheResult<Prices> { Ok(BTreeMap::from([("AAPL".to_string(), 100)])) },
///     SyncConfig::default(),
/// );
///
/// // First reader of an empty namespace bootstraps it with a push.
/// assert_eq!(prices.get("AAPL")?, Some(100));
/// assert_eq!(prices.revision(), Some(Revision::FIRST));
/// ```
pub struct SyncedDataset<T> {
    namespace: Namespace,
    data_key: String,
    revision_key: String,
    store: Arc<dyn KvStore>,
    loader: Box<dyn Loader<T>>,
    codec: Box<dyn Codec<T>>,
    clock: Arc<dyn Clock>,
    recheck_interval: chrono::Duration,
    state: ReentrantMutex<RefCell<SyncState<T>>>,
    views: AttachedViews,
}

impl<T> SyncedDataset<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an unsynchronized dataset using the JSON codec.
    pub fn new<S, L>(store: Arc<S>, namespace: Namespace, loader: L, config: SyncConfig) -> Self
    where
        S: KvStore + 'static,
        L: Loader<T> + 'static,
    {
        Self::with_codec(store, namespace, loader, JsonCodec, config)
    }
}

impl<T> SyncedDataset<T>
where
    T: Send + Sync + 'static,
{
    /// Create an unsynchronized dataset with an explicit codec.
    pub fn with_codec<S, L, C>(
        store: Arc<S>,
        namespace: Namespace,
        loader: L,
        codec: C,
        config: SyncConfig,
    ) -> Self
    where
        S: KvStore + 'static,
        L: Loader<T> + 'static,
        C: Codec<T> + 'static,
    {
        let store: Arc<dyn KvStore> = store;
        Self {
            data_key: namespace.data_key(),
            revision_key: namespace.revision_key(),
            namespace,
            store,
            loader: Box::new(loader),
            codec: Box::new(codec),
            clock: Arc::new(SystemClock),
            // Out-of-range intervals never elapse.
            recheck_interval: chrono::Duration::from_std(config.recheck_interval)
                .unwrap_or(chrono::Duration::MAX),
            state: ReentrantMutex::new(RefCell::new(SyncState::unsynchronized())),
            views: AttachedViews::new(),
        }
    }

    /// Replace the clock used for recheck throttling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The revision of the local snapshot; `None` if never synchronized.
    pub fn revision(&self) -> Option<Revision> {
        self.state.lock().borrow().revision
    }

    /// Current synchronization state without contacting the store.
    pub fn status(&self) -> SyncStatus {
        let guard = self.state.lock();
        let state = guard.borrow();
        SyncStatus {
            namespace: self.namespace.clone(),
            revision: state.revision,
            last_checked: state.last_checked,
        }
    }

    /// Load fresh content and publish it as a new revision.
    ///
    /// The payload write and the revision increment go out as one atomic
    /// batch. Racing pushes from other processes are not arbitrated: the
    /// last payload written wins, but every push advances the revision.
    pub fn push(&self) -> CacheResult<Revision> {
        let guard = self.state.lock();

        let value = self.loader.load()?;
        let bytes = self.codec.encode(&value)?;
        let results = self.store.atomic_batch(&[
            BatchOp::set(self.data_key.as_str(), bytes),
            BatchOp::increment(self.revision_key.as_str()),
        ])?;
        let revision = results
            .get(1)
            .and_then(|result| result.counter())
            .map(Revision::new)
            .ok_or_else(|| StoreError::BatchFailed {
                reason: format!("no counter returned for {}", self.revision_key),
            })?;

        {
            let mut state = guard.borrow_mut();
            state.revision = Some(revision);
            state.snapshot = Some(Arc::new(value));
        }

        tracing::debug!(
            name = %self.namespace.name(),
            version = %self.namespace.version(),
            revision = revision.get(),
            "Pushed new revision"
        );
        Ok(revision)
    }

    /// Adopt the revision and content currently in the store.
    ///
    /// A namespace with no revision key has never been written (or was
    /// purged); the puller then becomes its first writer and pushes.
    ///
    /// # Errors
    ///
    /// A revision key without a data key is reported as
    /// [`ConsistencyError::MissingData`]. Decode failures leave the previous
    /// snapshot in place.
    pub fn pull(&self) -> CacheResult<Revision> {
        let guard = self.state.lock();

        let Some(raw_revision) = self.store.get(&self.revision_key)? else {
            tracing::debug!(
                name = %self.namespace.name(),
                version = %self.namespace.version(),
                "Nothing to pull, pushing initial revision"
            );
            return self.push();
        };
        let revision = Revision::parse(&self.revision_key, &raw_revision)?;

        let raw_data =
            self.store
                .get(&self.data_key)?
                .ok_or_else(|| ConsistencyError::MissingData {
                    data_key: self.data_key.clone(),
                })?;
        let value = self.codec.decode(&raw_data)?;

        {
            let mut state = guard.borrow_mut();
            state.revision = Some(revision);
            state.snapshot = Some(Arc::new(value));
        }

        tracing::debug!(
            name = %self.namespace.name(),
            version = %self.namespace.version(),
            revision = revision.get(),
            "Pulled latest revision"
        );
        Ok(revision)
    }

    /// Delete the dataset from the store and forget the local snapshot.
    ///
    /// Other processes are not notified; their next staleness check finds
    /// the revision key gone and bootstraps the namespace again.
    pub fn purge(&self) -> CacheResult<()> {
        let guard = self.state.lock();

        self.store.atomic_batch(&[
            BatchOp::delete(self.data_key.as_str()),
            BatchOp::delete(self.revision_key.as_str()),
        ])?;
        *guard.borrow_mut() = SyncState::unsynchronized();

        tracing::debug!(
            name = %self.namespace.name(),
            version = %self.namespace.version(),
            "Purged"
        );
        Ok(())
    }

    /// Staleness check run before every read.
    ///
    /// Returns without store traffic while the last check is younger than
    /// the recheck interval. An unsynchronized dataset pulls. A synchronized
    /// one reads only the revision key and pulls if the store is ahead or
    /// the key is gone. If the store is unavailable the check is abandoned
    /// and the stale snapshot keeps being served; the last-checked stamp is
    /// only written once a decision has been reached.
    pub fn refresh(&self) -> CacheResult<()> {
        let guard = self.state.lock();

        let (local, last_checked) = {
            let state = guard.borrow();
            (state.revision, state.last_checked)
        };

        if let Some(checked) = last_checked {
            if self.clock.now().signed_duration_since(checked) < self.recheck_interval {
                tracing::trace!(name = %self.namespace.name(), "Recheck throttled");
                return Ok(());
            }
        }

        match local {
            None => {
                self.pull()?;
            }
            Some(local) => match self.check_revision(local)? {
                CheckOutcome::UpToDate => {}
                CheckOutcome::Unreachable => return Ok(()),
                CheckOutcome::NeedsPull => match self.pull() {
                    Ok(_) => {}
                    Err(e) if e.is_store_unavailable() => {
                        self.log_unreachable(&e);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
            },
        }

        guard.borrow_mut().last_checked = Some(self.clock.now());
        Ok(())
    }

    /// Compare `local` against the revision key without touching the data key.
    fn check_revision(&self, local: Revision) -> CacheResult<CheckOutcome> {
        tracing::trace!(
            name = %self.namespace.name(),
            revision = local.get(),
            "Checking for new revision"
        );
        match self.store.get(&self.revision_key) {
            Err(e) if e.is_unavailable() => {
                self.log_unreachable(&CacheError::from(e));
                Ok(CheckOutcome::Unreachable)
            }
            Err(e) => Err(e.into()),
            Ok(None) => Ok(CheckOutcome::NeedsPull),
            Ok(Some(raw)) => {
                let current = Revision::parse(&self.revision_key, &raw)?;
                if current.is_newer_than(&local) {
                    Ok(CheckOutcome::NeedsPull)
                } else {
                    Ok(CheckOutcome::UpToDate)
                }
            }
        }
    }

    fn log_unreachable(&self, error: &CacheError) {
        tracing::warn!(
            name = %self.namespace.name(),
            version = %self.namespace.version(),
            error = %error,
            "Store unavailable, serving stale snapshot"
        );
    }
}

impl<T> SnapshotSource for SyncedDataset<T>
where
    T: Send + Sync + 'static,
{
    type Snapshot = T;

    fn source_name(&self) -> String {
        self.namespace.to_string()
    }

    fn ensure_fresh(&self) -> CacheResult<()> {
        self.refresh()
    }

    fn current_snapshot(&self) -> Option<Arc<T>> {
        self.state.lock().borrow().snapshot.clone()
    }
}

impl<T> RevisionSource for SyncedDataset<T>
where
    T: Send + Sync + 'static,
{
    type Stamp = Option<Revision>;

    fn refresh(&self) -> CacheResult<()> {
        SyncedDataset::refresh(self)
    }

    fn stamp(&self) -> Option<Revision> {
        self.revision()
    }
}

impl<T> ViewOwner for SyncedDataset<T>
where
    T: Send + Sync + 'static,
{
    fn attached_views(&self) -> &AttachedViews {
        &self.views
    }
}

impl<T> fmt::Debug for SyncedDataset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("SyncedDataset")
            .field("namespace", &self.namespace)
            .field("revision", &state.revision)
            .field("last_checked", &state.last_checked)
            .field("recheck_interval", &self.recheck_interval)
            .finish_non_exhaustive()
    }
}
