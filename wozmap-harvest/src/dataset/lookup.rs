//! Per-address read access to a finished dataset
//!
//! Readers outside the harvester (REST pass-through, map exports) open the dataset
//! once and look rows up by address identity.

use super::parquet_io;
use super::schema::{WideRow, WideSchema};
use crate::error::{HarvestError, HarvestResult};
use std::collections::HashMap;
use std::path::Path;
use wozmap_common::{Address, OutputRow};

/// In-memory index over a harvested dataset
#[derive(Debug)]
pub struct DatasetIndex {
    schema: WideSchema,
    rows: HashMap<Address, WideRow>,
}

impl DatasetIndex {
    pub fn open(path: &Path) -> HarvestResult<Self> {
        let (schema, rows) =
            parquet_io::read_dataset(path).map_err(|source| HarvestError::DatasetRead {
                path: path.to_path_buf(),
                source,
            })?;

        let rows = rows
            .into_iter()
            .map(|row| (row.address.clone(), row))
            .collect();
        Ok(Self { schema, rows })
    }

    /// Sparse row for `address` (null cells omitted)
    pub fn get(&self, address: &Address) -> Option<OutputRow> {
        self.rows.get(address).map(|row| row.to_sparse(&self.schema))
    }

    /// Valuation years present as columns, ascending
    pub fn years(&self) -> &[i32] {
        self.schema.years()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
