//! Matching engine.
//!
//! [`Matcher`] stages a batch, optionally runs the resolver as one pass over
//! the [`IndexSpace`], and aggregates per-observation results. When a call
//! both updates and matches, aggregation runs inside the pass, so results
//! describe exactly the state that pass committed.

mod aggregator;
mod batch;
mod resolver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::Attribute;
use crate::cluster::{ClusterIdAllocator, SequenceAllocator};
use crate::error::MatchResult;
use crate::observation::Observation;
use crate::outcome::MatchOutcome;
use crate::storage::{IndexEntry, IndexSpace};

pub use aggregator::aggregate;
pub use batch::{BatchStage, StagedRow};
pub use resolver::{resolve, PassSummary};

/// What one `resolve_and_match` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Update the indices with the batch.
    pub update: bool,
    /// Compute per-observation results.
    pub match_results: bool,
    /// Report this attribute's value instead of the aggregate cluster id.
    pub projection: Option<Attribute>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::update_and_match()
    }
}

impl MatchOptions {
    /// Update, then report results against the updated indices.
    #[must_use]
    pub const fn update_and_match() -> Self {
        Self {
            update: true,
            match_results: true,
            projection: None,
        }
    }

    /// Update only; no results are computed.
    #[must_use]
    pub const fn update_only() -> Self {
        Self {
            update: true,
            match_results: false,
            projection: None,
        }
    }

    /// Report results against the indices as they stand.
    #[must_use]
    pub const fn match_only() -> Self {
        Self {
            update: false,
            match_results: true,
            projection: None,
        }
    }

    /// Replace cluster ids with values of `attribute`.
    #[must_use]
    pub const fn with_projection(mut self, attribute: Attribute) -> Self {
        self.projection = Some(attribute);
        self
    }
}

/// Entry point for resolving and matching company observations.
#[derive(Clone)]
pub struct Matcher {
    space: Arc<IndexSpace>,
    allocator: Arc<dyn ClusterIdAllocator>,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher").field("space", &self.space).finish_non_exhaustive()
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Matcher {
    /// Creates a matcher over `space`, drawing fresh ids from `allocator`.
    ///
    /// Every matcher sharing a space must share its allocator.
    #[must_use]
    pub fn new(space: Arc<IndexSpace>, allocator: Arc<dyn ClusterIdAllocator>) -> Self {
        Self { space, allocator }
    }

    /// Creates a matcher over an empty in-memory space.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(IndexSpace::new()), Arc::new(SequenceAllocator::new()))
    }

    /// The underlying index space.
    #[must_use]
    pub fn space(&self) -> &Arc<IndexSpace> {
        &self.space
    }

    /// Resolves and/or matches one batch.
    ///
    /// Results are returned in submission order; an empty vector when
    /// `options.match_results` is false.
    ///
    /// # Errors
    ///
    /// - [`MatchError::Validation`](crate::MatchError::Validation) if the batch is malformed;
    ///   nothing is read or written.
    /// - [`MatchError::Storage`](crate::MatchError::Storage) if the pass could not be
    ///   published; the indices are unchanged and the call may be retried.
    /// - [`MatchError::Allocation`](crate::MatchError::Allocation) if no fresh id could be
    ///   drawn; the indices are unchanged.
    pub fn resolve_and_match(
        &self,
        observations: Vec<Observation>,
        options: &MatchOptions,
    ) -> MatchResult<Vec<MatchOutcome>> {
        self.run(observations, options).map(|(_, outcomes)| outcomes)
    }

    /// Updates the indices with `observations` without computing results.
    ///
    /// # Errors
    ///
    /// As [`Matcher::resolve_and_match`].
    pub fn update(&self, observations: Vec<Observation>) -> MatchResult<PassSummary> {
        self.run(observations, &MatchOptions::update_only())
            .map(|(summary, _)| summary)
    }

    /// Matches `observations` against the indices without updating them.
    ///
    /// # Errors
    ///
    /// As [`Matcher::resolve_and_match`].
    pub fn match_only(
        &self,
        observations: Vec<Observation>,
        projection: Option<Attribute>,
    ) -> MatchResult<Vec<MatchOutcome>> {
        let options = MatchOptions {
            projection,
            ..MatchOptions::match_only()
        };
        self.resolve_and_match(observations, &options)
    }

    /// Point lookup on committed state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the space's lock is poisoned.
    pub fn lookup(&self, attribute: Attribute, value: &str) -> MatchResult<Option<IndexEntry>> {
        Ok(self.space.lookup(attribute, value)?)
    }

    fn run(
        &self,
        observations: Vec<Observation>,
        options: &MatchOptions,
    ) -> MatchResult<(PassSummary, Vec<MatchOutcome>)> {
        let stage = BatchStage::new(observations)?;
        debug!(
            rows = stage.len(),
            update = options.update,
            match_results = options.match_results,
            projection = ?options.projection,
            "staged batch"
        );

        if stage.is_empty() {
            return Ok((PassSummary::default(), Vec::new()));
        }

        if options.update {
            let allocator = self.allocator.as_ref();
            return self.space.write_pass(|view| {
                let summary = resolve(view, &stage, allocator)?;
                let outcomes = if options.match_results {
                    aggregate(&*view, &stage, options.projection)
                } else {
                    Vec::new()
                };
                Ok((summary, outcomes))
            });
        }

        if options.match_results {
            let outcomes = self
                .space
                .read(|committed| aggregate(committed, &stage, options.projection))?;
            return Ok((PassSummary::default(), outcomes));
        }

        Ok((PassSummary::default(), Vec::new()))
    }
}
