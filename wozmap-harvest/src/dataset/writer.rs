//! Merge-and-rewrite writer for the output dataset
//!
//! The persisted dataset is loaded once at open. Each flush merges a reconciled batch
//! into a staged copy (replace by address identity, append new identities, widen to the
//! union schema), writes it to `<path>.tmp`, renames it over the target and only then
//! commits the staged copy as the in-memory state. A failed write leaves both the file
//! on disk and the in-memory state as they were.

use super::parquet_io;
use super::schema::{ReconciledBatch, WideRow, WideSchema};
use crate::checkpoint::tmp_path_for;
use crate::error::{DatasetError, HarvestError, HarvestResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use wozmap_common::Address;

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub replaced: usize,
    /// Rows in the dataset after the flush
    pub total_rows: usize,
}

/// Single writer of the output dataset
#[derive(Debug)]
pub struct BatchWriter {
    path: PathBuf,
    schema: WideSchema,
    rows: Vec<WideRow>,
    index: HashMap<Address, usize>,
}

impl BatchWriter {
    /// Open the dataset at `path`, loading existing rows if the file exists
    pub fn open(path: impl Into<PathBuf>) -> HarvestResult<Self> {
        let path = path.into();

        let (schema, loaded) = if path.exists() {
            parquet_io::read_dataset(&path).map_err(|source| HarvestError::DatasetRead {
                path: path.clone(),
                source,
            })?
        } else {
            (WideSchema::empty(), Vec::new())
        };

        let mut rows: Vec<WideRow> = Vec::with_capacity(loaded.len());
        let mut index = HashMap::with_capacity(loaded.len());
        for row in loaded {
            match index.get(&row.address) {
                Some(&pos) => {
                    tracing::warn!(
                        address = %row.address,
                        "Duplicate address in dataset, keeping last row"
                    );
                    rows[pos] = row;
                }
                None => {
                    index.insert(row.address.clone(), rows.len());
                    rows.push(row);
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            years = schema.len(),
            "Output dataset opened"
        );

        Ok(Self {
            path,
            schema,
            rows,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema of the persisted dataset
    pub fn schema(&self) -> &WideSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Merge `batch` into the dataset and persist it atomically
    ///
    /// An empty batch is a no-op and does not rewrite the file.
    pub fn flush(&mut self, batch: ReconciledBatch) -> HarvestResult<FlushSummary> {
        if batch.is_empty() {
            return Ok(FlushSummary {
                total_rows: self.rows.len(),
                ..FlushSummary::default()
            });
        }

        let union = self.schema.union(&batch.schema);
        let mut staged: Vec<WideRow> = self
            .rows
            .iter()
            .cloned()
            .map(|row| row.widen(&self.schema, &union))
            .collect();
        let mut staged_index = self.index.clone();
        let mut summary = FlushSummary::default();

        for row in batch.rows {
            let row = row.widen(&batch.schema, &union);
            match staged_index.get(&row.address) {
                Some(&pos) => {
                    staged[pos] = row;
                    summary.replaced += 1;
                }
                None => {
                    staged_index.insert(row.address.clone(), staged.len());
                    staged.push(row);
                    summary.inserted += 1;
                }
            }
        }

        self.persist(&union, &staged)?;

        self.schema = union;
        self.rows = staged;
        self.index = staged_index;
        summary.total_rows = self.rows.len();

        tracing::debug!(
            path = %self.path.display(),
            inserted = summary.inserted,
            replaced = summary.replaced,
            total_rows = summary.total_rows,
            years = self.schema.len(),
            "Dataset flushed"
        );
        Ok(summary)
    }

    fn persist(&self, schema: &WideSchema, rows: &[WideRow]) -> HarvestResult<()> {
        let tmp_path = tmp_path_for(&self.path);

        let result = (|| -> Result<(), DatasetError> {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            parquet_io::write_dataset(&tmp_path, schema, rows)?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        result.map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            HarvestError::DatasetWrite {
                path: self.path.clone(),
                source,
            }
        })
    }
}
