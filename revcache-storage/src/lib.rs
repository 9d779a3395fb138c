//! revcache Storage - Synchronized Datasets and Derived Views
//!
//! Keeps per-process snapshots of named datasets consistent through a
//! shared key-value store. Each dataset's payload and revision counter live
//! under deterministic keys; readers compare revisions at most once per
//! recheck interval and only fetch the payload when it changed.
//!
//! - [`store`]: the [`KvStore`] contract with in-memory and LMDB backends
//! - [`dataset`]: [`SyncedDataset`] and its push / pull / purge protocol
//! - [`read`]: mapping and sequence reads gated by the staleness check
//! - [`view`]: [`DerivedView`], lazily recomputed per source revision
//! - [`attach`]: views declared once and attached to each owner instance

pub mod attach;
pub mod dataset;
pub mod read;
pub mod store;
pub mod view;

pub use attach::{AttachedView, AttachedViews, OwnerRef, ViewDecl, ViewOwner};
pub use dataset::{Loader, SyncStatus, SyncedDataset};
pub use read::{Mapping, MappingRead, Sequence, SequenceRead, SnapshotIter, SnapshotSource};
pub use store::{BatchOp, BatchResult, KvStore, LmdbStore, LmdbStoreError, MemoryStore};
pub use view::{Captured, DerivedView, RevisionSource};
