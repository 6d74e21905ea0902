//! NFS-e Certificate and Signature Library
//!
//! Holds the issuer's client certificate and produces the enveloped XML
//! signatures the ABRASF 2.04 webservices require.
//!
//! ## Profile
//!
//! - **Container**: PKCS#12 (A1) with an RSA key
//! - **Canonicalization**: C14N 1.0, comments dropped
//! - **Digest / signature**: SHA-1 / RSA-SHA1 (mandated by the legacy profile)
//! - **Key info**: signer certificate embedded as base64 DER

pub mod c14n;
pub mod certificate;
pub mod error;
pub mod signature;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use certificate::CertificateBundle;
pub use error::{CertificateError, SigningError};
pub use signature::{SignaturePlacement, sign, sign_all, sign_with, verify_signatures};
