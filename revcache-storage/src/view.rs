//! Derived views over revisioned sources.
//!
//! A [`DerivedView`] caches a value computed from a source and recomputes it
//! only when the source's revision stamp moves. Checking a view is one
//! staleness check on the source plus one stamp comparison, so repeated
//! reads at an unchanged revision never recompute.
//!
//! Views are sources themselves (their stamp is the stamp they captured),
//! so a view over a view behaves exactly like a view over a dataset. Tuples
//! of sources are sources too: a view over `(a, b)` recomputes when either
//! side changes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use revcache_core::CacheResult;

use crate::read::SnapshotSource;

/// Anything with a refresh hook and a comparable revision stamp.
pub trait RevisionSource: Send + Sync {
    /// Identifies the content a view was computed from.
    type Stamp: Clone + PartialEq + fmt::Debug + Send + Sync;

    /// Run the source's own staleness check.
    fn refresh(&self) -> CacheResult<()>;

    /// The stamp of the content currently held, without any check.
    fn stamp(&self) -> Self::Stamp;
}

impl<S: RevisionSource + ?Sized> RevisionSource for Arc<S> {
    type Stamp = S::Stamp;

    fn refresh(&self) -> CacheResult<()> {
        (**self).refresh()
    }

    fn stamp(&self) -> S::Stamp {
        (**self).stamp()
    }
}

impl<A, B> RevisionSource for (A, B)
where
    A: RevisionSource,
    B: RevisionSource,
{
    type Stamp = (A::Stamp, B::Stamp);

    fn refresh(&self) -> CacheResult<()> {
        self.0.refresh()?;
        self.1.refresh()
    }

    fn stamp(&self) -> Self::Stamp {
        (self.0.stamp(), self.1.stamp())
    }
}

impl<A, B, C> RevisionSource for (A, B, C)
where
    A: RevisionSource,
    B: RevisionSource,
    C: RevisionSource,
{
    type Stamp = (A::Stamp, B::Stamp, C::Stamp);

    fn refresh(&self) -> CacheResult<()> {
        self.0.refresh()?;
        self.1.refresh()?;
        self.2.refresh()
    }

    fn stamp(&self) -> Self::Stamp {
        (self.0.stamp(), self.1.stamp(), self.2.stamp())
    }
}

/// The source stamp a view last computed from.
///
/// `Uncomputed` is distinct from every stamp a source can report, including
/// `None` for a dataset that has never been synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured<S> {
    Uncomputed,
    At(S),
}

impl<S: PartialEq> Captured<S> {
    fn is_at(&self, stamp: &S) -> bool {
        matches!(self, Self::At(captured) if captured == stamp)
    }
}

struct ViewState<St, T> {
    captured: Captured<St>,
    snapshot: Option<Arc<T>>,
    recomputations: u64,
}

type ComputeFn<S, T> = Box<dyn Fn(&S) -> CacheResult<T> + Send + Sync>;

/// A read-only value derived from a revisioned source, recomputed lazily.
///
/// # Example
///
/// ```ignore
/// let prices = Arc::new(SyncedDataset::new(store, ns, load_prices, config));
/// let expensive = DerivedView::new("expensive", Arc::clone(&prices), |prices| {
///     Ok(prices.items()?.into_iter().filter(|(_, p)| *p > 100).map(|(s, _)| s).collect::<Vec<_>>())
/// });
///
/// // Computed on first read, then reused until `prices` moves to a new revision.
/// let first = expensive.first()?;
/// ```
pub struct DerivedView<S: RevisionSource, T> {
    name: String,
    source: S,
    compute: ComputeFn<S, T>,
    state: Mutex<ViewState<S::Stamp, T>>,
}

impl<S, T> DerivedView<S, T>
where
    S: RevisionSource,
    T: Send + Sync,
{
    pub fn new<F>(name: impl Into<String>, source: S, compute: F) -> Self
    where
        F: Fn(&S) -> CacheResult<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source,
            compute: Box::new(compute),
            state: Mutex::new(ViewState {
                captured: Captured::Uncomputed,
                snapshot: None,
                recomputations: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The source stamp the current snapshot was computed from.
    pub fn captured(&self) -> Captured<S::Stamp> {
        self.state.lock().captured.clone()
    }

    /// How many times the view has been computed.
    pub fn recomputations(&self) -> u64 {
        self.state.lock().recomputations
    }

    /// Force recomputation on the next read.
    pub fn invalidate(&self) {
        self.state.lock().captured = Captured::Uncomputed;
    }

    /// Refresh the source, then recompute if its stamp moved.
    ///
    /// A failed computation leaves the previous snapshot and stamp in
    /// place, so the next read retries.
    pub fn refresh(&self) -> CacheResult<()> {
        self.source.refresh()?;

        let mut state = self.state.lock();
        if state.captured.is_at(&self.source.stamp()) {
            return Ok(());
        }

        let value = (self.compute)(&self.source)?;
        // Reads inside `compute` may have pulled a newer revision.
        state.captured = Captured::At(self.source.stamp());
        state.snapshot = Some(Arc::new(value));
        state.recomputations += 1;

        tracing::trace!(
            view = %self.name,
            captured = ?state.captured,
            "Recomputed derived view"
        );
        Ok(())
    }
}

impl<S, T> SnapshotSource for DerivedView<S, T>
where
    S: RevisionSource,
    T: Send + Sync,
{
    type Snapshot = T;

    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn ensure_fresh(&self) -> CacheResult<()> {
        DerivedView::refresh(self)
    }

    fn current_snapshot(&self) -> Option<Arc<T>> {
        self.state.lock().snapshot.clone()
    }
}

impl<S, T> RevisionSource for DerivedView<S, T>
where
    S: RevisionSource,
    T: Send + Sync,
{
    type Stamp = Captured<S::Stamp>;

    fn refresh(&self) -> CacheResult<()> {
        DerivedView::refresh(self)
    }

    fn stamp(&self) -> Self::Stamp {
        self.captured()
    }
}

impl<S: RevisionSource, T> fmt::Debug for DerivedView<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DerivedView")
            .field("name", &self.name)
            .field("captured", &state.captured)
            .field("recomputations", &state.recomputations)
            .finish_non_exhaustive()
    }
}
