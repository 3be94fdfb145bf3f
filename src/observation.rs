//! Observations: one normalized company description submitted by a source.
//!
//! Observations arrive with attribute values that have already been
//! normalized upstream. They live only for the duration of one request.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::attribute::{Attribute, AttributeValues};
use crate::error::ValidationError;

/// One row of an incoming batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Caller-supplied identifier, unique within the batch, echoed back in results.
    #[serde(rename = "id", alias = "external_id")]
    pub external_id: String,
    /// Provenance of the description.
    pub source: String,
    /// When the description was produced; drives recency.
    #[serde(rename = "datetime", alias = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Normalized identifying attribute values.
    #[serde(flatten)]
    pub attributes: AttributeValues,
}

impl Observation {
    /// Creates an observation builder.
    #[must_use]
    pub fn builder() -> ObservationBuilder {
        ObservationBuilder::new()
    }

    /// Returns the value of `attribute`, if present.
    #[must_use]
    pub fn value(&self, attribute: Attribute) -> Option<&str> {
        self.attributes.get(attribute)
    }

    /// Returns true if at least one identifying attribute is present.
    #[must_use]
    pub fn has_identifying_attribute(&self) -> bool {
        !self.attributes.is_empty()
    }
}

/// Builder for [`Observation`].
#[derive(Debug, Default)]
pub struct ObservationBuilder {
    external_id: Option<String>,
    source: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    attributes: AttributeValues,
}

impl ObservationBuilder {
    /// Creates a new observation builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the external id.
    #[must_use]
    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Sets the source.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the observation timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets one attribute value.
    #[must_use]
    pub fn attribute(mut self, attribute: Attribute, value: impl Into<String>) -> Self {
        self.attributes.set(attribute, Some(value.into()));
        self
    }

    /// Sets one attribute value if `value` is `Some`.
    #[must_use]
    pub fn maybe_attribute(mut self, attribute: Attribute, value: Option<&str>) -> Self {
        self.attributes.set(attribute, value.map(str::to_string));
        self
    }

    /// Builds the observation.
    ///
    /// Only the envelope is checked here; batch-level rules (at least one
    /// attribute, unique ids) are enforced when staging.
    pub fn build(self) -> Result<Observation, ValidationError> {
        let external_id = self.external_id.ok_or(ValidationError::MissingField {
            field: "id".to_string(),
        })?;

        let timestamp = self.timestamp.ok_or(ValidationError::MissingField {
            field: "datetime".to_string(),
        })?;

        let source = self.source.ok_or(ValidationError::MissingField {
            field: "source".to_string(),
        })?;

        Ok(Observation {
            external_id,
            source,
            timestamp,
            attributes: self.attributes,
        })
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parses an RFC 3339 instant, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {raw}")))
}
