//! revcache Core - Shared Types
//!
//! Pure types with no store access. All other crates depend on this:
//! revisions and namespaces, the error taxonomy, configuration, value
//! codecs and the clock used for recheck throttling.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod revision;

pub use clock::{Clock, SystemClock};
pub use codec::{Codec, JsonCodec};
pub use config::{LmdbStoreConfig, SyncConfig, RECHECK_INTERVAL_ENV};
pub use error::{
    CacheError, CacheResult, CodecError, ConfigError, ConsistencyError, LoadError, StoreError,
    ViewError,
};
pub use revision::{Namespace, Revision, KEY_PREFIX};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
