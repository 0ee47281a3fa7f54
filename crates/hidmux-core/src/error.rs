//! Error types for `hidmux` core library.

use thiserror::Error;

/// Result type alias using `hidmux` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `hidmux` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
