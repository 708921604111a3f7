//! Row versioning for optimistic concurrency.
//!
//! Every persisted row carries a [`Version`]. A writer states the version it read;
//! the store applies the write only if the row is still at that version and then
//! bumps it. Two writers racing from the same read therefore cannot both succeed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamp of a stored row.
///
/// Versions start at [`Version::INITIAL`] when a row is inserted and increase by
/// one on every committed write.
///
/// # Examples
///
/// ```
/// use circulation_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert!(v0.is_initial());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version a row has right after insertion.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Get the raw version number.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The version after one more committed write.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether the row has never been written since insertion.
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A value together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The row contents.
    pub value: T,
    /// Version of the row when it was read.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Wrap a value read at `version`.
    #[must_use]
    pub const fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Drop the version and keep the value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
