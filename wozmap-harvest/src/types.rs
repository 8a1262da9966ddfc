//! Pipeline value types
//!
//! Per-item values that only live in memory while an address moves through the
//! pipeline: the resolution outcome, the canonical identifier and the fetched
//! valuation record.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use wozmap_common::{Address, OutputRow, PropertyInfo};

/// Handle the valuation service knows an address by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalIdentifier {
    /// BAG nummeraanduiding id (16 digits)
    pub id: String,
    /// Municipality code confirmed by the canonical lookup
    pub municipality_code: Option<String>,
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Why an address could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Suggest returned no candidate
    NoCandidate,
    /// Candidate id unknown to the canonical lookup
    StaleCandidate(String),
    /// Canonical document carries no identifier
    NoIdentifier(String),
    /// Best match is a different address
    Mismatch { found: String },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::NoCandidate => write!(f, "no suggestion candidate"),
            UnresolvedReason::StaleCandidate(id) => {
                write!(f, "candidate {} not found on lookup", id)
            }
            UnresolvedReason::NoIdentifier(id) => {
                write!(f, "candidate {} has no canonical identifier", id)
            }
            UnresolvedReason::Mismatch { found } => {
                write!(f, "best match is a different address ({})", found)
            }
        }
    }
}

/// Outcome of address resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(CanonicalIdentifier),
    Unresolved(UnresolvedReason),
}

/// One published valuation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuationEntry {
    /// Reference date (peildatum) of the valuation
    pub date: NaiveDate,
    /// Assessed value in euros
    pub value: i64,
}

/// Valuation history plus static attributes for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuationRecord {
    pub info: PropertyInfo,
    /// Entries ordered by date ascending
    pub entries: Vec<ValuationEntry>,
}

impl ValuationRecord {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sparse year → value projection
    ///
    /// The year of the reference date keys the value. When a year has several entries
    /// the latest date wins.
    pub fn yearly_values(&self) -> BTreeMap<i32, i64> {
        let mut latest: BTreeMap<i32, ValuationEntry> = BTreeMap::new();
        for entry in &self.entries {
            let year = entry.date.year();
            match latest.get(&year) {
                Some(existing) if existing.date >= entry.date => {}
                _ => {
                    latest.insert(year, *entry);
                }
            }
        }
        latest.into_iter().map(|(year, e)| (year, e.value)).collect()
    }

    /// Wide-format row for this record
    pub fn into_output_row(self, address: Address) -> OutputRow {
        let values = self.yearly_values();
        OutputRow {
            address,
            info: self.info,
            values,
        }
    }
}
