//! Common error types for wozmap

use thiserror::Error;

/// Common result type for wozmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across wozmap crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input (malformed address, bad parameter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
