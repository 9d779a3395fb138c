//! Revisions and dataset namespaces.
//!
//! A dataset is identified by its [`Namespace`] (`name` x `version`). The
//! namespace derives the two keys a dataset owns in the shared store: the
//! data key holding the encoded payload and the revision key holding the
//! store-native counter bumped on every push.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, ConsistencyError};

/// Prefix shared by every key revcache writes.
pub const KEY_PREFIX: &str = "cached";

/// A revision of a shared dataset.
///
/// Revisions are store-native integer counters: the first push of a
/// namespace produces revision 1 and every later push strictly increases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(i64);

impl Revision {
    /// The revision produced by the first push into an empty namespace.
    pub const FIRST: Revision = Revision(1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// Check if this revision is newer than another.
    pub fn is_newer_than(&self, other: &Revision) -> bool {
        self.0 > other.0
    }

    /// Parse a revision from the raw bytes stored under a revision key.
    ///
    /// Stores keep counters as ASCII decimal integers.
    pub fn parse(revision_key: &str, raw: &[u8]) -> Result<Self, ConsistencyError> {
        let invalid = || ConsistencyError::InvalidRevision {
            revision_key: revision_key.to_string(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        };
        let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
        text.trim().parse::<i64>().map(Self).map_err(|_| invalid())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(name, version)` pair identifying one logical shared dataset.
///
/// Two datasets with an identical namespace are the same logical dataset,
/// in this process or any other. Components may not be empty or contain
/// `.`, which keeps derived keys collision-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    name: String,
    version: String,
}

impl Namespace {
    /// Build a namespace from a dataset name and version.
    ///
    /// Neither component may be empty or contain `.`, the key separator;
    /// otherwise `("a.b", "c")` and `("a", "b.c")` would share keys. Dotted
    /// versions such as `1.0` are rejected, so write them as `1_0`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let version = version.into();
        validate_component("name", &name)?;
        validate_component("version", &version)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Key holding the encoded payload: `cached.<name>.<version>.data`.
    pub fn data_key(&self) -> String {
        format!("{}.{}.{}.data", KEY_PREFIX, self.name, self.version)
    }

    /// Key holding the revision counter: `cached.<name>.<version>.revision`.
    pub fn revision_key(&self) -> String {
        format!("{}.{}.{}.revision", KEY_PREFIX, self.name, self.version)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn validate_component(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: field.to_string(),
        });
    }
    if value.contains('.') {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: format!(
                "must not contain '.', the key separator (use `{}` instead)",
                value.replace('.', "_")
            ),
        });
    }
    Ok(())
}
