//! Error types for company matching.
//!
//! Errors are strongly typed per layer using thiserror and folded into
//! [`MatchError`] at the public boundary, so callers can decide whether a
//! failed pass may be retried wholesale.

use thiserror::Error;

use crate::cluster::ClusterId;
use crate::storage::StorageError;

/// Boundary errors raised while staging a batch.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Observation '{external_id}' carries no identifying attribute")]
    NoIdentifyingAttribute {
        external_id: String,
    },

    #[error("Observation at position {position} has an empty external id")]
    EmptyExternalId {
        position: usize,
    },

    #[error("External id '{external_id}' appears more than once in the batch")]
    DuplicateExternalId {
        external_id: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },
}

/// Cluster id allocation failures. Always fatal for the pass.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Cluster id space exhausted after {last}")]
    Exhausted {
        last: ClusterId,
    },

    #[error("Cluster id allocator unavailable: {reason}")]
    Unavailable {
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),
}

impl MatchError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an allocation error.
    #[must_use]
    pub const fn is_allocation(&self) -> bool {
        matches!(self, Self::Allocation(_))
    }

    /// Returns true if the failed pass may be retried wholesale.
    ///
    /// A failed pass never leaves partial state behind, so storage failures
    /// are safe to retry. Allocation failures are fatal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => !matches!(e, StorageError::Corruption(_)),
            Self::Validation(_) | Self::Allocation(_) => false,
        }
    }
}

/// Result type alias for matching operations.
pub type MatchResult<T> = Result<T, MatchError>;
