//! Per-observation match results.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::attribute::{Attribute, ATTRIBUTE_COUNT};
use crate::cluster::ClusterId;

/// Six bits in priority order, set when the attribute is present and its own
/// cluster agrees with the observation's aggregate cluster.
///
/// Renders as a six-character `0`/`1` string, most trusted attribute first.
///
/// # Examples
///
/// ```
/// use company_matching::{AgreementSignature, Attribute};
///
/// let sig = AgreementSignature::empty()
///     .with(Attribute::CompaniesHouseId)
///     .with(Attribute::CompanyName);
/// assert_eq!(sig.to_string(), "101000");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AgreementSignature(u8);

impl AgreementSignature {
    /// A signature with no agreeing attribute.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns a copy with `attribute`'s bit set.
    #[must_use]
    pub const fn with(self, attribute: Attribute) -> Self {
        Self(self.0 | (1 << attribute.rank()))
    }

    /// Returns true if `attribute` agrees with the aggregate.
    #[must_use]
    pub const fn agrees(self, attribute: Attribute) -> bool {
        self.0 & (1 << attribute.rank()) != 0
    }

    /// Number of agreeing attributes.
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for AgreementSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for attribute in Attribute::ALL {
            f.write_str(if self.agrees(attribute) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AgreementSignature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ATTRIBUTE_COUNT {
            return Err(format!("signature must have {ATTRIBUTE_COUNT} digits: {s}"));
        }
        Attribute::ALL
            .into_iter()
            .zip(s.chars())
            .try_fold(Self::empty(), |sig, (attribute, c)| match c {
                '1' => Ok(sig.with(attribute)),
                '0' => Ok(sig),
                other => Err(format!("invalid signature digit '{other}' in {s}")),
            })
    }
}

impl Serialize for AgreementSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgreementSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What an observation resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    /// Aggregate cluster id.
    Cluster(ClusterId),
    /// Projected attribute value for the aggregate cluster.
    Identifier(String),
    /// No indexed attribute (or, under projection, no value to project).
    Unmatched,
}

impl MatchValue {
    /// The cluster id, if this is a cluster result.
    #[must_use]
    pub const fn cluster(&self) -> Option<ClusterId> {
        match self {
            Self::Cluster(id) => Some(*id),
            Self::Identifier(_) | Self::Unmatched => None,
        }
    }

    /// The projected identifier, if this is a projection result.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Identifier(v) => Some(v),
            Self::Cluster(_) | Self::Unmatched => None,
        }
    }
}

/// Result row for one observation of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Echo of the observation's external id.
    #[serde(rename = "id")]
    pub external_id: String,
    /// Aggregate cluster or projected identifier.
    #[serde(rename = "match_id")]
    pub value: MatchValue,
    /// Per-attribute agreement with the aggregate cluster.
    #[serde(rename = "similarity")]
    pub signature: AgreementSignature,
}
