//! Identifying attributes and per-observation attribute values.
//!
//! The six attributes form a closed, priority-ordered set. Priority governs
//! both tie-breaking and cascade direction: a higher-priority attribute's
//! clustering decision propagates to lower-priority attributes, never the
//! reverse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of identifying attributes.
pub const ATTRIBUTE_COUNT: usize = 6;

/// One of the six identifying attributes, declared in descending priority.
///
/// # Examples
///
/// ```
/// use company_matching::Attribute;
///
/// assert!(Attribute::CompaniesHouseId.outranks(Attribute::DunsNumber));
/// assert_eq!(Attribute::ALL[2], Attribute::CompanyName);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Companies House registration number.
    CompaniesHouseId,
    /// Dun & Bradstreet number.
    DunsNumber,
    /// Normalized company name.
    CompanyName,
    /// Contact email, reduced to its domain.
    ContactEmail,
    /// CDMS reference, reduced to digits.
    CdmsRef,
    /// Postcode, lower-cased without whitespace.
    Postcode,
}

impl Attribute {
    /// All attributes in descending priority order.
    pub const ALL: [Self; ATTRIBUTE_COUNT] = [
        Self::CompaniesHouseId,
        Self::DunsNumber,
        Self::CompanyName,
        Self::ContactEmail,
        Self::CdmsRef,
        Self::Postcode,
    ];

    /// Zero-based priority rank; `0` is the most trusted attribute.
    #[must_use]
    pub const fn rank(self) -> usize {
        match self {
            Self::CompaniesHouseId => 0,
            Self::DunsNumber => 1,
            Self::CompanyName => 2,
            Self::ContactEmail => 3,
            Self::CdmsRef => 4,
            Self::Postcode => 5,
        }
    }

    /// Returns true if `self` has strictly higher priority than `other`.
    #[must_use]
    pub const fn outranks(self, other: Self) -> bool {
        self.rank() < other.rank()
    }

    /// Field name used on the wire and in persisted state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompaniesHouseId => "companies_house_id",
            Self::DunsNumber => "duns_number",
            Self::CompanyName => "company_name",
            Self::ContactEmail => "contact_email",
            Self::CdmsRef => "cdms_ref",
            Self::Postcode => "postcode",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| format!("unknown attribute: {s}"))
    }
}

/// The optional, already-normalized attribute values carried by one observation.
///
/// Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValues {
    /// Companies House registration number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companies_house_id: Option<String>,
    /// Dun & Bradstreet number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duns_number: Option<String>,
    /// Normalized company name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Contact email domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    /// CDMS reference digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdms_ref: Option<String>,
    /// Normalized postcode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
}

impl AttributeValues {
    fn slot(&self, attribute: Attribute) -> &Option<String> {
        match attribute {
            Attribute::CompaniesHouseId => &self.companies_house_id,
            Attribute::DunsNumber => &self.duns_number,
            Attribute::CompanyName => &self.company_name,
            Attribute::ContactEmail => &self.contact_email,
            Attribute::CdmsRef => &self.cdms_ref,
            Attribute::Postcode => &self.postcode,
        }
    }

    fn slot_mut(&mut self, attribute: Attribute) -> &mut Option<String> {
        match attribute {
            Attribute::CompaniesHouseId => &mut self.companies_house_id,
            Attribute::DunsNumber => &mut self.duns_number,
            Attribute::CompanyName => &mut self.company_name,
            Attribute::ContactEmail => &mut self.contact_email,
            Attribute::CdmsRef => &mut self.cdms_ref,
            Attribute::Postcode => &mut self.postcode,
        }
    }

    /// Returns the value for `attribute`, or `None` if absent or empty.
    #[must_use]
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.slot(attribute).as_deref().filter(|v| !v.is_empty())
    }

    /// Sets (or clears, with `None`) the value for `attribute`.
    pub fn set(&mut self, attribute: Attribute, value: Option<String>) {
        *self.slot_mut(attribute) = value;
    }

    /// Iterates over present values in priority order.
    pub fn present(&self) -> impl Iterator<Item = (Attribute, &str)> + '_ {
        Attribute::ALL
            .into_iter()
            .filter_map(move |a| self.get(a).map(|v| (a, v)))
    }

    /// Returns true if no attribute value is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}
