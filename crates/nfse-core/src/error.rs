//! Error types for the NFS-e core library.

use thiserror::Error;

use crate::xml::XmlError;

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invoice or lot field failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// XML could not be indexed
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A required field is absent or malformed.
///
/// Validation is fail-fast: the first offending field is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed for {field}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `recipient.cpf_cnpj`).
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
