//! NFS-e Core Library
//!
//! Shared functionality for the NFS-e emission client:
//! - Domain model for RPS, lots and emission records
//! - Field validation and fixed-point money formatting
//! - Configuration resolution and hierarchy
//! - Structural XML indexing used by signing and response parsing
//! - Common error types

pub mod config;
pub mod error;
pub mod model;
pub mod tracing_init;
pub mod xml;

pub use config::Config;
pub use error::{Error, Result, ValidationError};
pub use model::{
    AuditEntry, Batch, EmissionRecord, EmissionStatus, InvoiceRequest, Issuer, Operation,
    RpsIdentifier, ServiceMessage,
};
