//! Dataset fingerprint used as cache partition key

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-derived identifier of a dataset
///
/// Two datasets with the same fingerprint are treated as interchangeable
/// for caching purposes. Computing it is the data engine's job; the cache
/// only compares fingerprints for exact equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataFingerprint(String);

impl DataFingerprint {
    /// Wrap an already-computed fingerprint
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw fingerprint text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
