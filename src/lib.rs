//! # company-matching
//!
//! Incremental, priority-ordered entity resolution for company descriptions.
//!
//! Many partial descriptions of the same company arrive from different
//! sources over time. Each carries up to six exact-match identifying
//! attributes. The crate keeps one value→cluster index per attribute and,
//! batch by batch, re-clusters values so that descriptions sharing any
//! attribute share a cluster, higher-priority attributes win disagreements,
//! and newer evidence overrides older evidence.
//!
//! ## Core Concepts
//!
//! - **Attribute**: one of six identifying fields, in fixed priority order
//! - **Observation**: one normalized description submitted by a source
//! - **Index entry**: a value's current cluster, prior cluster and provenance
//! - **Resolver**: the cascading update that keeps the six indices consistent
//! - **Outcome**: an observation's aggregate cluster and agreement signature
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use company_matching::{Attribute, MatchOptions, MatchValue, Matcher, Observation};
//!
//! let matcher = Matcher::in_memory();
//! let observation = Observation::builder()
//!     .external_id("1")
//!     .source("dit.datahub")
//!     .timestamp(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap())
//!     .attribute(Attribute::CompaniesHouseId, "ch1")
//!     .attribute(Attribute::DunsNumber, "dun1")
//!     .build()?;
//!
//! let outcomes = matcher.resolve_and_match(vec![observation], &MatchOptions::update_and_match())?;
//! assert_eq!(outcomes[0].value.cluster().map(|c| c.get()), Some(1));
//! assert_eq!(outcomes[0].signature.to_string(), "110000");
//! # Ok::<(), company_matching::MatchError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod attribute;
pub mod cluster;
pub mod error;
pub mod observation;
pub mod outcome;

// Indices and the matching engine
pub mod engine;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use attribute::{Attribute, AttributeValues, ATTRIBUTE_COUNT};
pub use cluster::{ClusterId, ClusterIdAllocator, SequenceAllocator};
pub use engine::{MatchOptions, Matcher, PassSummary};
pub use error::{AllocationError, MatchError, MatchResult, ValidationError};
pub use observation::{parse_timestamp, Observation, ObservationBuilder};
pub use outcome::{AgreementSignature, MatchOutcome, MatchValue};
pub use storage::{IndexEntry, IndexSpace, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_index_space, PersistentConfig, PersistentIndexSpace};
