//! Synthetic certificates for tests.
//!
//! Requires the `test-utils` feature outside this crate.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};

use crate::certificate::CertificateBundle;
use crate::error::CertificateError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Self-signed RSA-2048 certificate valid from `not_before_days` to
/// `not_after_days` relative to now (negative values are in the past).
pub fn generate_identity(
    common_name: &str,
    not_before_days: i64,
    not_after_days: i64,
) -> Result<(PKey<Private>, X509), ErrorStack> {
    let key = PKey::from_rsa(Rsa::generate(2048)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    name.append_entry_by_nid(Nid::COUNTRYNAME, "BR")?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let now = chrono::Utc::now().timestamp();
    let not_before = Asn1Time::from_unix(now + not_before_days * SECONDS_PER_DAY)?;
    let not_after = Asn1Time::from_unix(now + not_after_days * SECONDS_PER_DAY)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok((key, builder.build()))
}

/// DER PKCS#12 container holding `key` and `cert`.
pub fn pkcs12_der(
    key: &PKey<Private>,
    cert: &X509,
    passphrase: &str,
) -> Result<Vec<u8>, ErrorStack> {
    Pkcs12::builder()
        .name("nfse")
        .pkey(key)
        .cert(cert)
        .build2(passphrase)?
        .to_der()
}

/// A valid one-year A1-style container.
pub fn generate_bundle(passphrase: &str) -> Result<Vec<u8>, ErrorStack> {
    let (key, cert) = generate_identity("NFSE TESTE LTDA:11222333000181", -1, 365)?;
    pkcs12_der(&key, &cert, passphrase)
}

/// A loaded bundle, skipping the container round trip.
pub fn test_bundle() -> Result<CertificateBundle, CertificateError> {
    let (key, cert) = generate_identity("NFSE TESTE LTDA:11222333000181", -1, 365)?;
    CertificateBundle::from_parts(key, cert, Vec::new())
}
