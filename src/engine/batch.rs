//! Batch staging.
//!
//! A [`BatchStage`] owns the observations of one request for the duration of
//! one pass. Rows keep their submission position, which is both the result
//! order and the tie-breaker between equally recent rows.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::attribute::Attribute;
use crate::error::ValidationError;
use crate::observation::Observation;

/// One staged observation.
#[derive(Debug, Clone)]
pub struct StagedRow {
    /// Zero-based submission position.
    pub position: usize,
    /// The observation as submitted.
    pub observation: Observation,
}

impl StagedRow {
    /// Value of `attribute` on this row, if present.
    #[must_use]
    pub fn value(&self, attribute: Attribute) -> Option<&str> {
        self.observation.value(attribute)
    }

    /// Observation timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.observation.timestamp
    }

    /// Observation source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.observation.source
    }
}

/// Validated, position-tagged batch.
#[derive(Debug, Clone, Default)]
pub struct BatchStage {
    rows: Vec<StagedRow>,
}

impl BatchStage {
    /// Stages `observations`, rejecting the whole batch on the first
    /// malformed row.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty or repeated external id, or an
    /// observation without any identifying attribute.
    pub fn new(observations: Vec<Observation>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(observations.len());
        let mut rows = Vec::with_capacity(observations.len());

        for (position, observation) in observations.into_iter().enumerate() {
            if observation.external_id.is_empty() {
                return Err(ValidationError::EmptyExternalId { position });
            }
            if !seen.insert(observation.external_id.clone()) {
                return Err(ValidationError::DuplicateExternalId {
                    external_id: observation.external_id,
                });
            }
            if !observation.has_identifying_attribute() {
                return Err(ValidationError::NoIdentifyingAttribute {
                    external_id: observation.external_id,
                });
            }
            rows.push(StagedRow {
                position,
                observation,
            });
        }

        Ok(Self { rows })
    }

    /// Staged rows in submission order.
    #[must_use]
    pub fn rows(&self) -> &[StagedRow] {
        &self.rows
    }

    /// Number of staged rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
