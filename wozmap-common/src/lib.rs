//! # wozmap Common Library
//!
//! Shared code for the wozmap crates including:
//! - Address identity type and normalization
//! - Output dataset column contract (consumed by readers of the harvested dataset)
//! - Configuration helpers (root folder, config file location, logging)
//! - Common error type

pub mod address;
pub mod config;
pub mod dataset;
pub mod error;

pub use address::Address;
pub use dataset::{OutputRow, PropertyInfo};
pub use error::{Error, Result};
