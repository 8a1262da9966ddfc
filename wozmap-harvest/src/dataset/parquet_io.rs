//! Parquet encoding/decoding of the wide valuation dataset
//!
//! Column layout is defined in [`wozmap_common::dataset`]: seven fixed identity and
//! static columns followed by `value_<year>` columns in ascending year order.

use super::schema::{WideRow, WideSchema};
use crate::error::DatasetError;
use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use wozmap_common::dataset::{
    value_column, year_of_column, CANONICAL_ID_COLUMN, CONSTRUCTION_YEAR_COLUMN,
    FLOOR_AREA_COLUMN, HOUSE_LETTER_COLUMN, HOUSE_NUMBER_COLUMN, MUNICIPALITY_CODE_COLUMN,
    POSTAL_CODE_COLUMN,
};
use wozmap_common::{Address, PropertyInfo};

/// Rows per encoded record batch
const ROWS_PER_BATCH: usize = 65_536;

/// Arrow schema for a wide schema
pub fn arrow_schema(schema: &WideSchema) -> SchemaRef {
    let mut fields = vec![
        Field::new(POSTAL_CODE_COLUMN, DataType::Utf8, false),
        Field::new(HOUSE_NUMBER_COLUMN, DataType::UInt32, false),
        Field::new(HOUSE_LETTER_COLUMN, DataType::Utf8, true),
        Field::new(CANONICAL_ID_COLUMN, DataType::Utf8, false),
        Field::new(CONSTRUCTION_YEAR_COLUMN, DataType::Int32, true),
        Field::new(FLOOR_AREA_COLUMN, DataType::Int64, true),
        Field::new(MUNICIPALITY_CODE_COLUMN, DataType::Utf8, true),
    ];
    fields.extend(
        schema
            .years()
            .iter()
            .map(|year| Field::new(value_column(*year), DataType::Int64, true)),
    );
    Arc::new(Schema::new(fields))
}

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some(format!("wozmap-harvest {}", env!("CARGO_PKG_VERSION"))),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

/// Encode rows (already laid out against `schema`) into one record batch
pub fn encode_batch(schema: &WideSchema, rows: &[WideRow]) -> Result<RecordBatch, DatasetError> {
    let postal_codes = StringArray::from(
        rows.iter()
            .map(|r| Some(r.address.postal_code()))
            .collect::<Vec<_>>(),
    );
    let house_numbers = UInt32Array::from(
        rows.iter()
            .map(|r| r.address.house_number())
            .collect::<Vec<_>>(),
    );
    let house_letters = StringArray::from(
        rows.iter()
            .map(|r| r.address.house_letter())
            .collect::<Vec<_>>(),
    );
    let canonical_ids = StringArray::from(
        rows.iter()
            .map(|r| Some(r.info.canonical_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let construction_years = Int32Array::from(
        rows.iter()
            .map(|r| r.info.construction_year)
            .collect::<Vec<_>>(),
    );
    let floor_areas = Int64Array::from(rows.iter().map(|r| r.info.floor_area).collect::<Vec<_>>());
    let municipality_codes = StringArray::from(
        rows.iter()
            .map(|r| r.info.municipality_code.as_deref())
            .collect::<Vec<_>>(),
    );

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(postal_codes),
        Arc::new(house_numbers),
        Arc::new(house_letters),
        Arc::new(canonical_ids),
        Arc::new(construction_years),
        Arc::new(floor_areas),
        Arc::new(municipality_codes),
    ];

    for pos in 0..schema.len() {
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let cell = row.cells.get(pos).copied().ok_or_else(|| {
                DatasetError::Schema(format!(
                    "row {} has {} cells, schema has {} years",
                    row.address,
                    row.cells.len(),
                    schema.len()
                ))
            })?;
            values.push(cell);
        }
        columns.push(Arc::new(Int64Array::from(values)));
    }

    Ok(RecordBatch::try_new(arrow_schema(schema), columns)?)
}

/// Write the full dataset to `path` and fsync it
pub fn write_dataset(
    path: &Path,
    schema: &WideSchema,
    rows: &[WideRow],
) -> Result<(), DatasetError> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, arrow_schema(schema), Some(writer_properties()))?;

    for chunk in rows.chunks(ROWS_PER_BATCH) {
        let batch = encode_batch(schema, chunk)?;
        writer.write(&batch)?;
    }

    let file = writer.into_inner()?;
    file.sync_all()?;
    Ok(())
}

/// Read a dataset written by [`write_dataset`]
pub fn read_dataset(path: &Path) -> Result<(WideSchema, Vec<WideRow>), DatasetError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let file_schema = builder.schema().clone();
    let schema = WideSchema::from_years(
        file_schema
            .fields()
            .iter()
            .filter_map(|f| year_of_column(f.name())),
    );

    let reader = builder.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        decode_batch(&batch?, &schema, &mut rows)?;
    }

    Ok((schema, rows))
}

fn decode_batch(
    batch: &RecordBatch,
    schema: &WideSchema,
    out: &mut Vec<WideRow>,
) -> Result<(), DatasetError> {
    let postal_codes = column_as(batch, POSTAL_CODE_COLUMN, &DataType::Utf8)?;
    let house_numbers = column_as(batch, HOUSE_NUMBER_COLUMN, &DataType::UInt32)?;
    let house_letters = column_as(batch, HOUSE_LETTER_COLUMN, &DataType::Utf8)?;
    let canonical_ids = column_as(batch, CANONICAL_ID_COLUMN, &DataType::Utf8)?;
    let construction_years = column_as(batch, CONSTRUCTION_YEAR_COLUMN, &DataType::Int32)?;
    let floor_areas = column_as(batch, FLOOR_AREA_COLUMN, &DataType::Int64)?;
    let municipality_codes = column_as(batch, MUNICIPALITY_CODE_COLUMN, &DataType::Utf8)?;
    let value_arrays = schema
        .years()
        .iter()
        .map(|year| column_as(batch, &value_column(*year), &DataType::Int64))
        .collect::<Result<Vec<_>, _>>()?;

    let postal_codes = downcast::<StringArray>(&postal_codes, POSTAL_CODE_COLUMN)?;
    let house_numbers = downcast::<UInt32Array>(&house_numbers, HOUSE_NUMBER_COLUMN)?;
    let house_letters = downcast::<StringArray>(&house_letters, HOUSE_LETTER_COLUMN)?;
    let canonical_ids = downcast::<StringArray>(&canonical_ids, CANONICAL_ID_COLUMN)?;
    let construction_years =
        downcast::<Int32Array>(&construction_years, CONSTRUCTION_YEAR_COLUMN)?;
    let floor_areas = downcast::<Int64Array>(&floor_areas, FLOOR_AREA_COLUMN)?;
    let municipality_codes =
        downcast::<StringArray>(&municipality_codes, MUNICIPALITY_CODE_COLUMN)?;
    let value_columns = value_arrays
        .iter()
        .zip(schema.years())
        .map(|(array, year)| downcast::<Int64Array>(array, &value_column(*year)))
        .collect::<Result<Vec<_>, _>>()?;

    for row in 0..batch.num_rows() {
        // Out-of-range casts come back as nulls
        if postal_codes.is_null(row) || house_numbers.is_null(row) || canonical_ids.is_null(row) {
            return Err(DatasetError::Schema(format!(
                "row {}: missing or unreadable address identity",
                row
            )));
        }

        let address = Address::new(
            postal_codes.value(row),
            house_numbers.value(row),
            opt_str(house_letters, row),
        )
        .map_err(|e| DatasetError::Schema(format!("row {}: {}", row, e)))?;

        let info = PropertyInfo {
            canonical_id: canonical_ids.value(row).to_string(),
            construction_year: opt_value(construction_years, row),
            floor_area: opt_value(floor_areas, row),
            municipality_code: opt_str(municipality_codes, row).map(str::to_string),
        };

        let cells = value_columns.iter().map(|c| opt_value(*c, row)).collect();

        out.push(WideRow { address, info, cells });
    }
    Ok(())
}

/// Column `name`, cast to `data_type` when stored with another type
fn column_as(
    batch: &RecordBatch,
    name: &str,
    data_type: &DataType,
) -> Result<ArrayRef, DatasetError> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| DatasetError::Schema(format!("missing column '{}'", name)))?;
    if array.data_type() == data_type {
        return Ok(Arc::clone(array));
    }
    cast(array, data_type).map_err(|e| {
        DatasetError::Schema(format!(
            "column '{}' of type {} cannot be read as {}: {}",
            name,
            array.data_type(),
            data_type,
            e
        ))
    })
}

fn downcast<'a, T: Array + 'static>(
    array: &'a ArrayRef,
    name: &str,
) -> Result<&'a T, DatasetError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        DatasetError::Schema(format!(
            "column '{}' has unexpected type {}",
            name,
            array.data_type()
        ))
    })
}

fn opt_str(array: &StringArray, row: usize) -> Option<&str> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

fn opt_value<T>(array: &arrow::array::PrimitiveArray<T>, row: usize) -> Option<T::Native>
where
    T: arrow::datatypes::ArrowPrimitiveType,
{
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}
