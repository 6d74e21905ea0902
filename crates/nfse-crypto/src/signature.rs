//! Enveloped XML-DSig over elements referenced by `Id`.
//!
//! The ABRASF profile fixes the algorithms: inclusive C14N 1.0, SHA-1 digest
//! and RSA-SHA1 signature, with the signer certificate embedded as base64 DER.
//! Signatures are spliced into the source text at the requested position; the
//! rest of the document is left byte-for-byte untouched.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nfse_core::xml::XmlDocument;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::c14n::{canonicalize_element, canonicalize_fragment};
use crate::certificate::CertificateBundle;
use crate::error::SigningError;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const ENVELOPED_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SIGNATURE_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

/// Where the `Signature` element goes relative to the signed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignaturePlacement {
    /// Last child of the referenced element.
    Child,
    /// Immediately after the referenced element, under the same parent.
    Sibling,
}

/// Sign the element whose `Id` is `element_id` with the bundle's key.
pub fn sign(
    xml: &str,
    element_id: &str,
    bundle: &CertificateBundle,
    placement: SignaturePlacement,
) -> Result<String, SigningError> {
    sign_with(
        xml,
        element_id,
        bundle.private_key(),
        bundle.certificate(),
        placement,
    )
}

/// Sign the element whose `Id` is `element_id` with an explicit key and certificate.
pub fn sign_with(
    xml: &str,
    element_id: &str,
    key: &PKey<Private>,
    certificate: &X509,
    placement: SignaturePlacement,
) -> Result<String, SigningError> {
    if !certificate.public_key()?.public_eq(key) {
        return Err(SigningError::KeyMismatch);
    }

    let doc = XmlDocument::parse(xml)?;
    let target = find_by_id(&doc, element_id)?;
    let element = doc.element(target);

    let (insert_at, context) = match placement {
        SignaturePlacement::Child => {
            let content = element
                .content
                .clone()
                .ok_or_else(|| SigningError::EmptyElement(element_id.to_owned()))?;
            (content.end, target)
        }
        SignaturePlacement::Sibling => {
            let parent = element
                .parent
                .ok_or_else(|| SigningError::RootSibling(element_id.to_owned()))?;
            (element.span.end, parent)
        }
    };

    let canonical = canonicalize_element(&doc, target, None)?;
    let digest = STANDARD.encode(Sha1::digest(canonical.as_bytes()));

    let signed_info = signed_info_xml(element_id, &digest);
    let canonical_signed_info =
        canonicalize_fragment(&signed_info, &signature_scope(&doc, context))?;

    let mut signer = Signer::new(MessageDigest::sha1(), key)?;
    signer.update(canonical_signed_info.as_bytes())?;
    let signature_value = STANDARD.encode(signer.sign_to_vec()?);
    let certificate_b64 = STANDARD.encode(certificate.to_der()?);

    let signature = format!(
        "<Signature xmlns=\"{XMLDSIG_NS}\">{signed_info}\
         <SignatureValue>{signature_value}</SignatureValue>\
         <KeyInfo><X509Data><X509Certificate>{certificate_b64}</X509Certificate></X509Data></KeyInfo>\
         </Signature>"
    );

    debug!(element_id, ?placement, "Signed element");

    let mut out = String::with_capacity(xml.len() + signature.len());
    out.push_str(&xml[..insert_at]);
    out.push_str(&signature);
    out.push_str(&xml[insert_at..]);
    Ok(out)
}

/// Sign every element named `local_name`, each by its own `Id`, in document order.
pub fn sign_all(
    xml: &str,
    local_name: &str,
    bundle: &CertificateBundle,
    placement: SignaturePlacement,
) -> Result<String, SigningError> {
    let ids: Vec<String> = {
        let doc = XmlDocument::parse(xml)?;
        let targets = doc.find_all(local_name);
        if targets.is_empty() {
            return Err(SigningError::ElementNotFound(local_name.to_owned()));
        }
        targets
            .into_iter()
            .map(|idx| {
                element_id(&doc, idx)
                    .map(str::to_owned)
                    .ok_or_else(|| SigningError::MissingId(local_name.to_owned()))
            })
            .collect::<Result<_, _>>()?
    };

    let mut signed = xml.to_owned();
    for id in ids {
        signed = sign(&signed, &id, bundle, placement)?;
    }
    Ok(signed)
}

/// Verify every enveloped signature in `xml` against its embedded certificate.
///
/// Returns the number of signatures checked.
pub fn verify_signatures(xml: &str) -> Result<usize, SigningError> {
    let doc = XmlDocument::parse(xml)?;
    let mut verified = 0;

    for sig in doc.find_all("Signature") {
        let Some(signed_info) = doc.child(sig, "SignedInfo") else {
            continue;
        };
        verify_one(&doc, sig, signed_info)?;
        verified += 1;
    }
    Ok(verified)
}

fn verify_one(doc: &XmlDocument<'_>, sig: usize, signed_info: usize) -> Result<(), SigningError> {
    let algorithm = |parent: usize, name: &str| -> Result<String, SigningError> {
        doc.child(parent, name)
            .and_then(|idx| doc.element(idx).attribute("Algorithm"))
            .map(str::to_owned)
            .ok_or_else(|| SigningError::MalformedSignature(format!("missing {name}")))
    };

    let signature_method = algorithm(signed_info, "SignatureMethod")?;
    if signature_method != SIGNATURE_RSA_SHA1 {
        return Err(SigningError::UnsupportedAlgorithm(signature_method));
    }
    let c14n_method = algorithm(signed_info, "CanonicalizationMethod")?;
    if c14n_method != C14N_ALGORITHM {
        return Err(SigningError::UnsupportedAlgorithm(c14n_method));
    }

    let reference = doc
        .child(signed_info, "Reference")
        .ok_or_else(|| SigningError::MalformedSignature("missing Reference".into()))?;
    let digest_method = algorithm(reference, "DigestMethod")?;
    if digest_method != DIGEST_SHA1 {
        return Err(SigningError::UnsupportedAlgorithm(digest_method));
    }

    let uri = doc.element(reference).attribute("URI").unwrap_or_default();
    let target = match uri.strip_prefix('#') {
        Some(id) => find_by_id(doc, id)?,
        None if uri.is_empty() => doc.root(),
        None => {
            return Err(SigningError::MalformedSignature(format!(
                "external reference {uri}"
            )));
        }
    };

    let exclude = doc
        .is_descendant_of(sig, target)
        .then(|| doc.element(sig).span.clone());
    let canonical = canonicalize_element(doc, target, exclude)?;
    let digest = STANDARD.encode(Sha1::digest(canonical.as_bytes()));
    let expected = doc.child_text(reference, "DigestValue").unwrap_or_default();
    if digest != strip_whitespace(expected) {
        return Err(SigningError::DigestMismatch(uri.to_owned()));
    }

    let certificate_text = doc
        .descendant(sig, "X509Certificate")
        .map(|idx| doc.text(idx))
        .ok_or_else(|| SigningError::MalformedSignature("missing X509Certificate".into()))?;
    let der = decode_base64(certificate_text)?;
    let certificate = X509::from_der(&der)?;
    let public = certificate.public_key()?;

    let signature_value = doc
        .child_text(sig, "SignatureValue")
        .ok_or_else(|| SigningError::MalformedSignature("missing SignatureValue".into()))?;
    let signature_bytes = decode_base64(signature_value)?;

    let canonical_signed_info = canonicalize_element(doc, signed_info, None)?;
    let mut verifier = Verifier::new(MessageDigest::sha1(), &public)?;
    verifier.update(canonical_signed_info.as_bytes())?;
    if !verifier.verify(&signature_bytes)? {
        return Err(SigningError::InvalidSignature(uri.to_owned()));
    }
    Ok(())
}

fn signed_info_xml(element_id: &str, digest: &str) -> String {
    format!(
        "<SignedInfo>\
         <CanonicalizationMethod Algorithm=\"{C14N_ALGORITHM}\"/>\
         <SignatureMethod Algorithm=\"{SIGNATURE_RSA_SHA1}\"/>\
         <Reference URI=\"#{element_id}\">\
         <Transforms>\
         <Transform Algorithm=\"{ENVELOPED_TRANSFORM}\"/>\
         <Transform Algorithm=\"{C14N_ALGORITHM}\"/>\
         </Transforms>\
         <DigestMethod Algorithm=\"{DIGEST_SHA1}\"/>\
         <DigestValue>{digest}</DigestValue>\
         </Reference>\
         </SignedInfo>"
    )
}

/// Value of the element's ID attribute. ABRASF uses `Id`; some municipal
/// layouts write `id`.
fn element_id<'d>(doc: &'d XmlDocument<'_>, idx: usize) -> Option<&'d str> {
    let element = doc.element(idx);
    element.attribute("Id").or_else(|| element.attribute("id"))
}

fn find_by_id(doc: &XmlDocument<'_>, id: &str) -> Result<usize, SigningError> {
    let matches: Vec<usize> = (0..doc.len())
        .filter(|&idx| element_id(doc, idx) == Some(id))
        .collect();
    match matches.as_slice() {
        [] => Err(SigningError::ElementNotFound(id.to_owned())),
        [single] => Ok(*single),
        _ => Err(SigningError::DuplicateId(id.to_owned())),
    }
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn decode_base64(value: &str) -> Result<Vec<u8>, SigningError> {
    STANDARD
        .decode(strip_whitespace(value))
        .map_err(|e| SigningError::MalformedSignature(format!("invalid base64: {e}")))
}

/// Namespace bindings a signature placed under `parent` would see.
fn signature_scope(doc: &XmlDocument<'_>, parent: usize) -> BTreeMap<Option<String>, String> {
    let mut scope = doc.in_scope_namespaces(parent);
    scope.insert(None, XMLDSIG_NS.to_owned());
    scope
}
