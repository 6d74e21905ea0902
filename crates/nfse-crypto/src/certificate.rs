//! Client certificate store.
//!
//! Loads the issuer's PKCS#12 (A1) bundle once per process. The private key
//! only ever lives in memory; nothing here writes it to disk or logs it.

use std::path::Path;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::CertificateError;

/// Key material for signing and mutual TLS. Read-only after load.
pub struct CertificateBundle {
    key: PKey<Private>,
    certificate: X509,
    chain: Vec<X509>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.subject())
            .field("fingerprint", &self.fingerprint().ok())
            .field("not_after", &self.not_after)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CertificateBundle {
    /// Parse a DER-encoded PKCS#12 container.
    pub fn load(bundle: &[u8], passphrase: &str) -> Result<Self, CertificateError> {
        let pkcs12 =
            Pkcs12::from_der(bundle).map_err(|e| CertificateError::Corrupt(e.to_string()))?;
        let parsed = pkcs12
            .parse2(passphrase)
            .map_err(|e| CertificateError::Decrypt(e.to_string()))?;

        let key = parsed.pkey.ok_or(CertificateError::MissingPrivateKey)?;
        let certificate = parsed.cert.ok_or(CertificateError::MissingCertificate)?;
        let chain: Vec<X509> = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        Self::from_parts(key, certificate, chain)
    }

    /// Read and parse a PKCS#12 file.
    pub fn load_from_file(path: &Path, passphrase: &str) -> Result<Self, CertificateError> {
        let bytes = Zeroizing::new(std::fs::read(path)?);
        let bundle = Self::load(&bytes, passphrase)?;
        info!(
            path = %path.display(),
            subject = bundle.subject().as_deref().unwrap_or("-"),
            not_after = %bundle.not_after,
            "Loaded client certificate"
        );
        Ok(bundle)
    }

    /// Assemble a bundle from an already decoded key and certificate.
    pub fn from_parts(
        key: PKey<Private>,
        certificate: X509,
        chain: Vec<X509>,
    ) -> Result<Self, CertificateError> {
        if key.id() != Id::RSA {
            return Err(CertificateError::UnsupportedKey(format!("{:?}", key.id())));
        }
        let public = certificate.public_key()?;
        if !public.public_eq(&key) {
            return Err(CertificateError::KeyMismatch);
        }

        let not_before = asn1_to_utc(certificate.not_before())?;
        let not_after = asn1_to_utc(certificate.not_after())?;

        Ok(Self {
            key,
            certificate,
            chain,
            not_before,
            not_after,
        })
    }

    pub const fn private_key(&self) -> &PKey<Private> {
        &self.key
    }

    pub const fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Intermediate certificates shipped in the container.
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    /// Whether the certificate expires within `days` of `now` (or already has).
    pub fn expires_within(&self, now: DateTime<Utc>, days: u32) -> bool {
        now + Duration::days(i64::from(days)) >= self.not_after
    }

    /// Log a warning when the certificate is expired or close to expiry.
    ///
    /// An expired certificate is still usable locally; the webservice decides.
    pub fn check_expiry(&self, now: DateTime<Utc>, warning_days: u32) {
        if self.is_expired(now) {
            warn!(not_after = %self.not_after, "Client certificate has expired");
        } else if self.expires_within(now, warning_days) {
            warn!(
                not_after = %self.not_after,
                days = (self.not_after - now).num_days(),
                "Client certificate expires soon"
            );
        }
    }

    /// Common name of the certificate subject.
    pub fn subject(&self) -> Option<String> {
        self.certificate
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|name| name.to_string())
    }

    /// SHA-256 of the DER certificate, lowercase hex.
    pub fn fingerprint(&self) -> Result<String, CertificateError> {
        let der = self.certificate.to_der()?;
        Ok(hex::encode(Sha256::digest(&der)))
    }

    /// DER certificate as standard base64, the `X509Certificate` payload.
    pub fn certificate_base64(&self) -> Result<String, CertificateError> {
        let der = self.certificate.to_der()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(der))
    }

    /// Certificate, chain and PKCS#8 key as one PEM buffer for the TLS identity.
    ///
    /// The buffer is wiped on drop.
    pub fn client_identity_pem(&self) -> Result<Zeroizing<Vec<u8>>, CertificateError> {
        let mut pem = Zeroizing::new(self.certificate.to_pem()?);
        for cert in &self.chain {
            pem.extend_from_slice(&cert.to_pem()?);
        }
        let key = Zeroizing::new(self.key.private_key_to_pem_pkcs8()?);
        pem.extend_from_slice(&key);
        Ok(pem)
    }
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, CertificateError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| CertificateError::Corrupt(format!("validity timestamp {seconds} out of range")))
}
