//! Error types for revcache operations

use thiserror::Error;

/// Backing key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be contacted at all.
    ///
    /// This is the only failure a staleness check recovers from locally.
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation on {key} failed: {reason}")]
    Backend { key: String, reason: String },

    #[error("Value at {key} is not an integer counter")]
    NotAnInteger { key: String },

    #[error("Atomic batch failed: {reason}")]
    BatchFailed { reason: String },
}

impl StoreError {
    /// Returns true if the store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Value codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    #[error("Failed to decode {type_name}: {reason}")]
    Decode { type_name: String, reason: String },
}

/// Inconsistent shared-store state detected while synchronizing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The revision counter exists but its payload is gone.
    #[error("Revision key present but data key {data_key} is missing")]
    MissingData { data_key: String },

    #[error("Revision key {revision_key} holds a non-integer value: {raw}")]
    InvalidRevision { revision_key: String, raw: String },

    /// The snapshot was dropped between the staleness check and the read,
    /// e.g. by a concurrent purge.
    #[error("No snapshot available for {source_name} after refresh")]
    NoSnapshot { source_name: String },
}

/// Derived view errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("Owner of view '{view}' has been dropped")]
    OwnerDropped { view: String },

    #[error("View '{view}' is already attached with value type {attached}, requested {requested}")]
    TypeMismatch {
        view: String,
        attached: String,
        requested: String,
    },
}

/// Failure reported by a dataset loader or a view computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Load failed for {source_name}: {reason}")]
pub struct LoadError {
    pub source_name: String,
    pub reason: String,
}

impl LoadError {
    pub fn new(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all revcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("View error: {0}")]
    View(#[from] ViewError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Returns true if this error means the store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_unavailable())
    }
}

/// Result type alias for revcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
