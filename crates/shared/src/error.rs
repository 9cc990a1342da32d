//! Error types for NextSlot

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Validation error: {0}")]
    Validation(String),
}
