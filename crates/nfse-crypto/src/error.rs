//! Certificate and signature error types.

use nfse_core::xml::XmlError;

/// Errors loading the client certificate bundle.
///
/// All of these are credential problems and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("Certificate container is corrupt: {0}")]
    Corrupt(String),

    #[error("Certificate container could not be decrypted (wrong passphrase?): {0}")]
    Decrypt(String),

    #[error("Certificate container has no private key")]
    MissingPrivateKey,

    #[error("Certificate container has no certificate")]
    MissingCertificate,

    #[error("Unsupported key type {0}; the signing profile requires RSA")]
    UnsupportedKey(String),

    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    #[error("Crypto backend error: {0}")]
    Backend(#[from] openssl::error::ErrorStack),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while signing or verifying a document.
///
/// During signing these indicate a structural bug in document construction.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("No element carries Id \"{0}\"")]
    ElementNotFound(String),

    #[error("More than one element carries Id \"{0}\"")]
    DuplicateId(String),

    #[error("Element <{0}> has no Id attribute")]
    MissingId(String),

    #[error("Cannot place a signature inside empty element with Id \"{0}\"")]
    EmptyElement(String),

    #[error("Element with Id \"{0}\" is the document root and cannot take a sibling signature")]
    RootSibling(String),

    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Digest mismatch for reference \"{0}\"")]
    DigestMismatch(String),

    #[error("Signature value does not verify for reference \"{0}\"")]
    InvalidSignature(String),

    #[error("Crypto backend error: {0}")]
    Backend(#[from] openssl::error::ErrorStack),
}
