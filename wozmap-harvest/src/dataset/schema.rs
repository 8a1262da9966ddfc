//! Wide schema reconciliation
//!
//! Rows arrive sparse (year → value) and with different year sets. Before a batch is
//! written, [`SchemaAccumulator::reconcile`] takes the union of the years in the batch
//! and in the persisted dataset and materializes every row against it. The union is
//! sorted, so the result does not depend on arrival order.

use std::collections::BTreeSet;
use wozmap_common::{Address, OutputRow, PropertyInfo};

/// Ordered set of valuation years, one `value_<year>` column each
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideSchema {
    years: Vec<i32>,
}

impl WideSchema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_years(years: impl IntoIterator<Item = i32>) -> Self {
        let set: BTreeSet<i32> = years.into_iter().collect();
        Self {
            years: set.into_iter().collect(),
        }
    }

    /// Years ascending
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Column position of `year`
    pub fn position(&self, year: i32) -> Option<usize> {
        self.years.binary_search(&year).ok()
    }

    pub fn union(&self, other: &WideSchema) -> WideSchema {
        WideSchema::from_years(self.years.iter().chain(other.years.iter()).copied())
    }
}

/// One row materialized against a [`WideSchema`]
///
/// `cells[i]` holds the value for `schema.years()[i]`; absent years are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRow {
    pub address: Address,
    pub info: PropertyInfo,
    pub cells: Vec<Option<i64>>,
}

impl WideRow {
    pub fn materialize(row: OutputRow, schema: &WideSchema) -> Self {
        let cells = schema
            .years()
            .iter()
            .map(|year| row.values.get(year).copied())
            .collect();
        Self {
            address: row.address,
            info: row.info,
            cells,
        }
    }

    /// Re-lay cells from schema `from` onto the wider schema `to`
    ///
    /// `from` must be a subset of `to`; values are carried over exactly.
    pub fn widen(self, from: &WideSchema, to: &WideSchema) -> Self {
        if from == to {
            return self;
        }
        let mut cells = vec![None; to.len()];
        for (year, value) in from.years().iter().zip(self.cells) {
            if let Some(pos) = to.position(*year) {
                cells[pos] = value;
            }
        }
        Self {
            address: self.address,
            info: self.info,
            cells,
        }
    }

    /// Sparse form, null cells dropped
    pub fn to_sparse(&self, schema: &WideSchema) -> OutputRow {
        let values = schema
            .years()
            .iter()
            .zip(&self.cells)
            .filter_map(|(year, cell)| cell.map(|v| (*year, v)))
            .collect();
        OutputRow {
            address: self.address.clone(),
            info: self.info.clone(),
            values,
        }
    }
}

/// A batch ready for the writer: rows and schema agree
#[derive(Debug, Clone, Default)]
pub struct ReconciledBatch {
    pub schema: WideSchema,
    pub rows: Vec<WideRow>,
}

impl ReconciledBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Buffers sparse rows between flushes
#[derive(Debug, Default)]
pub struct SchemaAccumulator {
    rows: Vec<OutputRow>,
}

impl SchemaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: OutputRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drain the buffer into a batch over `existing ∪ batch years`
    pub fn reconcile(&mut self, existing: &WideSchema) -> ReconciledBatch {
        let batch_years = WideSchema::from_years(self.rows.iter().flat_map(|r| r.years()));
        let schema = existing.union(&batch_years);

        let rows = self
            .rows
            .drain(..)
            .map(|row| WideRow::materialize(row, &schema))
            .collect();

        ReconciledBatch { schema, rows }
    }
}
