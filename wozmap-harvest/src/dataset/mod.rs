//! Wide-format output dataset: schema reconciliation, Parquet encoding, merge writer
//! and per-address lookup.

pub mod lookup;
pub mod parquet_io;
pub mod schema;
pub mod writer;

pub use lookup::DatasetIndex;
pub use schema::{ReconciledBatch, SchemaAccumulator, WideRow, WideSchema};
pub use writer::{BatchWriter, FlushSummary};
