//! Request-level errors

use thiserror::Error;

/// Conditions that reject a whole request before any line is processed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("input is too large: {size} bytes (limit {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("country not recognized: {0}")]
    UnknownCountry(String),
}
