//! Address list loading
//!
//! The address list is a CSV or Parquet file with `postal_code`, `house_number` and
//! optional `house_letter` columns (Dutch `postcode`, `huisnummer`, `huisletter` are
//! accepted too). Rows that do not form a valid address are skipped with a warning;
//! the position of an address in the returned list is its checkpoint index.

use crate::error::{HarvestError, HarvestResult};
use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use wozmap_common::Address;

const POSTAL_CODE_NAMES: [&str; 2] = ["postal_code", "postcode"];
const HOUSE_NUMBER_NAMES: [&str; 2] = ["house_number", "huisnummer"];
const HOUSE_LETTER_NAMES: [&str; 2] = ["house_letter", "huisletter"];

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "postcode")]
    postal_code: String,
    #[serde(alias = "huisnummer")]
    house_number: String,
    #[serde(default, alias = "huisletter")]
    house_letter: Option<String>,
}

/// Load the address list, choosing the format by file extension
pub fn load_addresses(path: &Path) -> HarvestResult<Vec<Address>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let addresses = match extension.as_str() {
        "csv" => load_csv(path)?,
        "parquet" | "pq" => load_parquet(path)?,
        other => {
            return Err(input_error(
                path,
                format!("unsupported input format '{}' (expected .csv or .parquet)", other),
            ))
        }
    };

    tracing::info!(path = %path.display(), addresses = addresses.len(), "Address list loaded");
    Ok(addresses)
}

fn input_error(path: &Path, reason: impl Into<String>) -> HarvestError {
    HarvestError::Input {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn load_csv(path: &Path) -> HarvestResult<Vec<Address>> {
    let file = File::open(path).map_err(|e| input_error(path, e.to_string()))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| input_error(path, e.to_string()))?
        .clone();
    let has = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
    if !has(&POSTAL_CODE_NAMES) || !has(&HOUSE_NUMBER_NAMES) {
        return Err(input_error(
            path,
            "missing postal_code/postcode or house_number/huisnummer header",
        ));
    }

    let mut addresses = Vec::new();
    for (line, result) in reader.deserialize::<CsvRecord>().enumerate() {
        // Header is line 1
        let line = line + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line, error = %e, "Skipping unreadable input row");
                continue;
            }
        };

        let parsed = record
            .house_number
            .parse::<u32>()
            .map_err(|e| e.to_string())
            .and_then(|number| {
                Address::new(&record.postal_code, number, record.house_letter.as_deref())
                    .map_err(|e| e.to_string())
            });

        match parsed {
            Ok(address) => addresses.push(address),
            Err(e) => tracing::warn!(line, error = %e, "Skipping invalid input address"),
        }
    }

    Ok(addresses)
}

fn load_parquet(path: &Path) -> HarvestResult<Vec<Address>> {
    let file = File::open(path).map_err(|e| input_error(path, e.to_string()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|b| b.build())
        .map_err(|e| input_error(path, e.to_string()))?;

    let mut addresses = Vec::new();
    let mut row_offset = 0usize;
    for batch in reader {
        let batch = batch.map_err(|e| input_error(path, e.to_string()))?;

        let postal_codes = column_as(&batch, &POSTAL_CODE_NAMES, &DataType::Utf8)
            .map_err(|reason| input_error(path, reason))?
            .ok_or_else(|| input_error(path, "missing postal_code/postcode column"))?;
        let house_numbers = column_as(&batch, &HOUSE_NUMBER_NAMES, &DataType::Int64)
            .map_err(|reason| input_error(path, reason))?
            .ok_or_else(|| input_error(path, "missing house_number/huisnummer column"))?;
        let house_letters = column_as(&batch, &HOUSE_LETTER_NAMES, &DataType::Utf8)
            .map_err(|reason| input_error(path, reason))?;

        let postal_codes = downcast::<StringArray>(&postal_codes);
        let house_numbers = downcast::<Int64Array>(&house_numbers);
        let house_letters = house_letters.as_ref().and_then(downcast::<StringArray>);

        let (Some(postal_codes), Some(house_numbers)) = (postal_codes, house_numbers) else {
            return Err(input_error(path, "address columns could not be read"));
        };

        for row in 0..batch.num_rows() {
            let record = row_offset + row;
            if postal_codes.is_null(row) || house_numbers.is_null(row) {
                tracing::warn!(
                    record,
                    "Skipping input row with missing postal code or house number"
                );
                continue;
            }

            let letter = house_letters
                .filter(|l| !l.is_null(row))
                .map(|l| l.value(row));

            let parsed = u32::try_from(house_numbers.value(row))
                .map_err(|e| e.to_string())
                .and_then(|number| {
                    Address::new(postal_codes.value(row), number, letter).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(address) => addresses.push(address),
                Err(e) => tracing::warn!(record, error = %e, "Skipping invalid input address"),
            }
        }
        row_offset += batch.num_rows();
    }

    Ok(addresses)
}

/// First column matching one of `names`, cast to `data_type`
fn column_as(
    batch: &RecordBatch,
    names: &[&str],
    data_type: &DataType,
) -> Result<Option<ArrayRef>, String> {
    let schema = batch.schema();
    let Some(idx) = names.iter().find_map(|n| schema.index_of(n).ok()) else {
        return Ok(None);
    };
    cast(batch.column(idx), data_type)
        .map(Some)
        .map_err(|e| format!("column '{}': {}", schema.field(idx).name(), e))
}

fn downcast<T: Array + 'static>(array: &ArrayRef) -> Option<&T> {
    array.as_any().downcast_ref::<T>()
}
