//! Views attached to an owning source.
//!
//! A [`ViewDecl`] names a derived value once, at type level, and every owner
//! instance lazily gets its own [`DerivedView`] of it the first time the
//! declaration is resolved against that owner. Later resolutions return the
//! same view, so its cached value and recomputation count are shared by all
//! readers of that owner.
//!
//! The view refers back to its owner weakly. Dropping the owner drops the
//! registry and every attached view nobody else holds; a view that outlives
//! its owner fails reads with [`ViewError::OwnerDropped`].

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use revcache_core::{CacheResult, ViewError};

use crate::view::{DerivedView, RevisionSource};

/// A source that can carry attached views.
pub trait ViewOwner: RevisionSource + Sized + 'static {
    fn attached_views(&self) -> &AttachedViews;
}

struct AttachedEntry {
    view: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Per-owner registry of attached views, keyed by declaration name.
#[derive(Default)]
pub struct AttachedViews {
    views: Mutex<HashMap<&'static str, AttachedEntry>>,
}

impl AttachedViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the views resolved so far, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.views.lock().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }
}

impl fmt::Debug for AttachedViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedViews")
            .field("names", &self.names())
            .finish()
    }
}

/// Weak handle from an attached view back to its owner.
pub struct OwnerRef<O> {
    owner: Weak<O>,
    view: &'static str,
}

impl<O: ViewOwner> OwnerRef<O> {
    /// The owner, if it is still alive.
    pub fn owner(&self) -> CacheResult<Arc<O>> {
        self.owner.upgrade().ok_or_else(|| {
            ViewError::OwnerDropped {
                view: self.view.to_string(),
            }
            .into()
        })
    }
}

impl<O: ViewOwner> RevisionSource for OwnerRef<O> {
    type Stamp = Option<O::Stamp>;

    fn refresh(&self) -> CacheResult<()> {
        RevisionSource::refresh(&*self.owner()?)
    }

    fn stamp(&self) -> Self::Stamp {
        self.owner.upgrade().map(|owner| owner.stamp())
    }
}

/// A view attached to an owner of type `O`.
pub type AttachedView<O, T> = DerivedView<OwnerRef<O>, T>;

/// Declaration of a view computed from an owner of type `O`.
///
/// # Example
///
/// ```ignore
/// fn expensive(prices: &SyncedDataset<Prices>) -> CacheResult<Vec<String>> {
///     Ok(prices.items()?.into_iter().filter(|(_, p)| *p > 100).map(|(s, _)| s).collect())
/// }
///
/// const EXPENSIVE: ViewDecl<SyncedDataset<Prices>, Vec<String>> =
///     ViewDecl::new("expensive", expensive);
///
/// let view = EXPENSIVE.view(&prices)?;
/// assert!(Arc::ptr_eq(&view, &EXPENSIVE.view(&prices)?));
/// ```
pub struct ViewDecl<O, T> {
    name: &'static str,
    compute: fn(&O) -> CacheResult<T>,
}

impl<O, T> Clone for ViewDecl<O, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, T> Copy for ViewDecl<O, T> {}

impl<O, T> fmt::Debug for ViewDecl<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDecl")
            .field("name", &self.name)
            .field("value_type", &type_name::<T>())
            .finish()
    }
}

impl<O, T> ViewDecl<O, T> {
    pub const fn new(name: &'static str, compute: fn(&O) -> CacheResult<T>) -> Self {
        Self { name, compute }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<O, T> ViewDecl<O, T>
where
    O: ViewOwner,
    T: Send + Sync + 'static,
{
    /// The view of this declaration attached to `owner`, created on first use.
    ///
    /// # Errors
    ///
    /// [`ViewError::TypeMismatch`] if `owner` already has a view of the same
    /// name holding a different value type.
    pub fn view(&self, owner: &Arc<O>) -> CacheResult<Arc<AttachedView<O, T>>> {
        let mut views = owner.attached_views().views.lock();

        if let Some(entry) = views.get(self.name) {
            let attached = entry.type_name;
            return Arc::clone(&entry.view)
                .downcast::<AttachedView<O, T>>()
                .map_err(|_| {
                    ViewError::TypeMismatch {
                        view: self.name.to_string(),
                        attached: attached.to_string(),
                        requested: type_name::<T>().to_string(),
                    }
                    .into()
                });
        }

        let compute = self.compute;
        let source = OwnerRef {
            owner: Arc::downgrade(owner),
            view: self.name,
        };
        let view = Arc::new(DerivedView::new(
            self.name,
            source,
            move |source: &OwnerRef<O>| {
                let owner = source.owner()?;
                compute(&owner)
            },
        ));

        views.insert(
            self.name,
            AttachedEntry {
                view: Arc::clone(&view) as Arc<dyn Any + Send + Sync>,
                type_name: type_name::<T>(),
            },
        );
        tracing::debug!(view = self.name, value_type = type_name::<T>(), "Attached view");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SyncedDataset;
    use crate::read::SequenceRead;
    use crate::store::MemoryStore;
    use crate::view::Captured;
    use revcache_core::{CacheError, Namespace, Revision, SyncConfig};
    use std::collections::BTreeMap;
    use std::time::Duration;

    type Prices = BTreeMap<String, u32>;

    fn symbols(prices: &SyncedDataset<Prices>) -> CacheResult<Vec<String>> {
        crate::read::MappingRead::keys(prices)
    }

    fn total(prices: &SyncedDataset<Prices>) -> CacheResult<Vec<u32>> {
        Ok(vec![crate::read::MappingRead::values(prices)?.iter().sum()])
    }

    const SYMBOLS: ViewDecl<SyncedDataset<Prices>, Vec<String>> = ViewDecl::new("symbols", symbols);
    const TOTAL: ViewDecl<SyncedDataset<Prices>, Vec<u32>> = ViewDecl::new("total", total);
    const SYMBOLS_AS_TOTAL: ViewDecl<SyncedDataset<Prices>, Vec<u32>> =
        ViewDecl::new("symbols", total);

    fn prices(store: &Arc<MemoryStore>, version: &str, price: u32) -> Arc<SyncedDataset<Prices>> {
        Arc::new(SyncedDataset::new(
            Arc::clone(store),
            Namespace::new("prices", version).unwrap(),
            move || -> CacheResult<Prices> {
                Ok(BTreeMap::from([
                    ("AAPL".to_string(), price),
                    ("MSFT".to_string(), price + 1),
                ]))
            },
            SyncConfig::new().with_recheck_interval(Duration::ZERO),
        ))
    }

    #[test]
    fn test_same_view_per_owner() {
        let store = Arc::new(MemoryStore::new());
        let owner = prices(&store, "v1", 10);

        let first = SYMBOLS.view(&owner).unwrap();
        let second = SYMBOLS.view(&owner).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(owner.attached_views().names(), vec!["symbols"]);
    }

    #[test]
    fn test_views_are_per_owner() {
        let store = Arc::new(MemoryStore::new());
        let cheap = prices(&store, "v1", 10);
        let dear = prices(&store, "v2", 1000);

        let cheap_total = TOTAL.view(&cheap).unwrap();
        let dear_total = TOTAL.view(&dear).unwrap();
        assert!(!Arc::ptr_eq(&cheap_total, &dear_total));
        assert_eq!(cheap_total.to_vec().unwrap(), vec![21]);
        assert_eq!(dear_total.to_vec().unwrap(), vec![2001]);
    }

    #[test]
    fn test_attached_view_recomputes_per_revision() {
        let store = Arc::new(MemoryStore::new());
        let owner = prices(&store, "v1", 10);
        let view = SYMBOLS.view(&owner).unwrap();

        for _ in 0..100 {
            assert_eq!(SequenceRead::len(&*view).unwrap(), 2);
        }
        assert_eq!(view.recomputations(), 1);
        assert_eq!(view.captured(), Captured::At(Some(Some(Revision::FIRST))));

        owner.push().unwrap();
        assert_eq!(view.first().unwrap(), Some("AAPL".to_string()));
        assert_eq!(view.recomputations(), 2);
    }

    #[test]
    fn test_type_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let owner = prices(&store, "v1", 10);
        SYMBOLS.view(&owner).unwrap();

        let err = SYMBOLS_AS_TOTAL.view(&owner).unwrap_err();
        assert!(matches!(
            err,
            CacheError::View(ViewError::TypeMismatch { ref view, .. }) if view == "symbols"
        ));
    }

    #[test]
    fn test_view_outliving_owner() {
        let store = Arc::new(MemoryStore::new());
        let owner = prices(&store, "v1", 10);
        let view = TOTAL.view(&owner).unwrap();
        assert_eq!(view.to_vec().unwrap(), vec![21]);

        drop(owner);
        assert_eq!(
            view.to_vec().unwrap_err(),
            CacheError::View(ViewError::OwnerDropped {
                view: "total".to_string()
            })
        );
        assert_eq!(view.source().stamp(), None);
    }
}
