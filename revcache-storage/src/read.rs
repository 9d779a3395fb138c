//! Read-only collection access over refreshed snapshots.
//!
//! Datasets and derived views answer reads the same way: run their own
//! staleness check, then answer from the local snapshot. That logic lives
//! here once. A type only describes its two halves through
//! [`SnapshotSource`] and gets [`MappingRead`] or [`SequenceRead`] for free,
//! depending on the shape of its snapshot.
//!
//! Reads hand out owned values (or the shared `Arc` snapshot), so no lock is
//! held while the caller works with the data.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use revcache_core::{CacheResult, ConsistencyError};

/// Something holding a local snapshot guarded by a staleness check.
pub trait SnapshotSource {
    type Snapshot;

    /// Human-readable name used in errors.
    fn source_name(&self) -> String;

    /// Run the staleness check, refreshing the snapshot if it is out of date.
    fn ensure_fresh(&self) -> CacheResult<()>;

    /// The snapshot as of the last refresh, without any check.
    fn current_snapshot(&self) -> Option<Arc<Self::Snapshot>>;

    /// Run the staleness check and return the resulting snapshot.
    fn fresh_snapshot(&self) -> CacheResult<Arc<Self::Snapshot>> {
        self.ensure_fresh()?;
        self.current_snapshot().ok_or_else(|| {
            ConsistencyError::NoSnapshot {
                source_name: self.source_name(),
            }
            .into()
        })
    }
}

/// Key-value snapshot shapes.
pub trait Mapping {
    type Key;
    type Value;

    fn lookup<Q>(&self, key: &Q) -> Option<&Self::Value>
    where
        Self::Key: Borrow<Q>,
        Q: Hash + Ord + ?Sized;

    fn entry_count(&self) -> usize;

    /// Entries in the mapping's own iteration order.
    fn entries(&self) -> Box<dyn Iterator<Item = (&Self::Key, &Self::Value)> + '_>;
}

impl<K, V, S> Mapping for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Key = K;
    type Value = V;

    fn lookup<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.get(key)
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(self.iter())
    }
}

impl<K, V> Mapping for BTreeMap<K, V>
where
    K: Ord,
{
    type Key = K;
    type Value = V;

    fn lookup<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.get(key)
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(self.iter())
    }
}

/// Indexed snapshot shapes.
pub trait Sequence {
    type Item;

    fn at(&self, index: usize) -> Option<&Self::Item>;

    fn item_count(&self) -> usize;
}

impl<V> Sequence for Vec<V> {
    type Item = V;

    fn at(&self, index: usize) -> Option<&V> {
        self.as_slice().get(index)
    }

    fn item_count(&self) -> usize {
        self.len()
    }
}

impl<V> Sequence for VecDeque<V> {
    type Item = V;

    fn at(&self, index: usize) -> Option<&V> {
        VecDeque::get(self, index)
    }

    fn item_count(&self) -> usize {
        self.len()
    }
}

/// Mapping-style reads. Every call runs the staleness check first.
pub trait MappingRead: SnapshotSource
where
    Self::Snapshot: Mapping,
{
    /// Value stored under `key`.
    fn get<Q>(&self, key: &Q) -> CacheResult<Option<<Self::Snapshot as Mapping>::Value>>
    where
        <Self::Snapshot as Mapping>::Key: Borrow<Q>,
        <Self::Snapshot as Mapping>::Value: Clone,
        Q: Hash + Ord + ?Sized,
    {
        Ok(self.fresh_snapshot()?.lookup(key).cloned())
    }

    fn contains_key<Q>(&self, key: &Q) -> CacheResult<bool>
    where
        <Self::Snapshot as Mapping>::Key: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        Ok(self.fresh_snapshot()?.lookup(key).is_some())
    }

    fn len(&self) -> CacheResult<usize> {
        Ok(self.fresh_snapshot()?.entry_count())
    }

    fn is_empty(&self) -> CacheResult<bool> {
        Ok(MappingRead::len(self)? == 0)
    }

    /// Keys in iteration order.
    fn keys(&self) -> CacheResult<Vec<<Self::Snapshot as Mapping>::Key>>
    where
        <Self::Snapshot as Mapping>::Key: Clone,
    {
        let snapshot = self.fresh_snapshot()?;
        Ok(snapshot.entries().map(|(k, _)| k.clone()).collect())
    }

    fn values(&self) -> CacheResult<Vec<<Self::Snapshot as Mapping>::Value>>
    where
        <Self::Snapshot as Mapping>::Value: Clone,
    {
        let snapshot = self.fresh_snapshot()?;
        Ok(snapshot.entries().map(|(_, v)| v.clone()).collect())
    }

    #[allow(clippy::type_complexity)]
    fn items(
        &self,
    ) -> CacheResult<Vec<(<Self::Snapshot as Mapping>::Key, <Self::Snapshot as Mapping>::Value)>>
    where
        <Self::Snapshot as Mapping>::Key: Clone,
        <Self::Snapshot as Mapping>::Value: Clone,
    {
        let snapshot = self.fresh_snapshot()?;
        Ok(snapshot
            .entries()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// The whole current snapshot.
    fn snapshot(&self) -> CacheResult<Arc<Self::Snapshot>> {
        self.fresh_snapshot()
    }
}

impl<S> MappingRead for S
where
    S: SnapshotSource + ?Sized,
    S::Snapshot: Mapping,
{
}

/// Sequence-style reads. Every call runs the staleness check first.
pub trait SequenceRead: SnapshotSource
where
    Self::Snapshot: Sequence,
{
    fn get(&self, index: usize) -> CacheResult<Option<<Self::Snapshot as Sequence>::Item>>
    where
        <Self::Snapshot as Sequence>::Item: Clone,
    {
        Ok(self.fresh_snapshot()?.at(index).cloned())
    }

    fn first(&self) -> CacheResult<Option<<Self::Snapshot as Sequence>::Item>>
    where
        <Self::Snapshot as Sequence>::Item: Clone,
    {
        SequenceRead::get(self, 0)
    }

    fn last(&self) -> CacheResult<Option<<Self::Snapshot as Sequence>::Item>>
    where
        <Self::Snapshot as Sequence>::Item: Clone,
    {
        let snapshot = self.fresh_snapshot()?;
        Ok(snapshot
            .item_count()
            .checked_sub(1)
            .and_then(|last| snapshot.at(last))
            .cloned())
    }

    fn len(&self) -> CacheResult<usize> {
        Ok(self.fresh_snapshot()?.item_count())
    }

    fn is_empty(&self) -> CacheResult<bool> {
        Ok(SequenceRead::len(self)? == 0)
    }

    /// Iterate over the snapshot current at the time of the call.
    ///
    /// The iterator keeps that snapshot alive; refreshes happening while it
    /// is consumed do not affect it.
    fn iter(&self) -> CacheResult<SnapshotIter<Self::Snapshot>> {
        Ok(SnapshotIter::new(self.fresh_snapshot()?))
    }

    fn to_vec(&self) -> CacheResult<Vec<<Self::Snapshot as Sequence>::Item>>
    where
        <Self::Snapshot as Sequence>::Item: Clone,
    {
        Ok(SequenceRead::iter(self)?.collect())
    }

    /// The whole current snapshot.
    fn snapshot(&self) -> CacheResult<Arc<Self::Snapshot>> {
        self.fresh_snapshot()
    }
}

impl<S> SequenceRead for S
where
    S: SnapshotSource + ?Sized,
    S::Snapshot: Sequence,
{
}

/// Owning iterator over one sequence snapshot.
#[derive(Debug)]
pub struct SnapshotIter<S> {
    snapshot: Arc<S>,
    position: usize,
}

impl<S> SnapshotIter<S> {
    fn new(snapshot: Arc<S>) -> Self {
        Self {
            snapshot,
            position: 0,
        }
    }
}

impl<S> Iterator for SnapshotIter<S>
where
    S: Sequence,
    S::Item: Clone,
{
    type Item = S::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.snapshot.at(self.position).cloned()?;
        self.position += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.item_count().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<S> ExactSizeIterator for SnapshotIter<S>
where
    S: Sequence,
    S::Item: Clone,
{
}
