//! Cluster identifiers and their allocator.
//!
//! Cluster ids are opaque positive integers. They are issued only by a
//! [`ClusterIdAllocator`], strictly increasing, and never reused.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;

/// Identifier of a resolved company identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(u64);

impl ClusterId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClusterId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Issues globally unique, monotonically increasing cluster ids.
///
/// Implementations must be safe under concurrent callers. Injected into the
/// matcher as an owned service so tests can substitute their own.
pub trait ClusterIdAllocator: Send + Sync {
    /// Returns an id strictly greater than every id previously returned.
    fn next(&self) -> Result<ClusterId, AllocationError>;
}

/// Lock-free in-memory sequence, starting at `1` unless seeded.
#[derive(Debug)]
pub struct SequenceAllocator {
    last: AtomicU64,
}

impl SequenceAllocator {
    /// Creates a sequence whose first id is `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Creates a sequence whose first id is `high_water + 1`.
    ///
    /// Used to resume a durable counter after recovery.
    #[must_use]
    pub const fn starting_after(high_water: ClusterId) -> Self {
        Self {
            last: AtomicU64::new(high_water.get()),
        }
    }

    /// The most recently issued id, if any.
    #[must_use]
    pub fn last_issued(&self) -> Option<ClusterId> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            raw => Some(ClusterId(raw)),
        }
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterIdAllocator for SequenceAllocator {
    fn next(&self) -> Result<ClusterId, AllocationError> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .map(|prev| ClusterId(prev + 1))
            .map_err(|last| AllocationError::Exhausted {
                last: ClusterId(last),
            })
    }
}
