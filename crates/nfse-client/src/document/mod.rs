//! ABRASF 2.04 request documents.
//!
//! One pure function per operation. Output is compact (no indentation) and
//! fully determined by the input, so builders can be regression-tested byte
//! for byte. Inputs are validated first; the first invalid field aborts the
//! build.

mod rps;
mod writer;

use nfse_core::model::{Batch, InvoiceRequest, Issuer, Operation, RpsIdentifier};
use nfse_core::ValidationError;

use crate::error::DocumentError;
use writer::XmlBuilder;

/// Target namespace of the ABRASF schema.
pub const NFSE_NAMESPACE: &str = "http://www.abrasf.org.br/nfse.xsd";

/// Layout version written on `LoteRps` and in the SOAP header block.
pub const LAYOUT_VERSION: &str = "2.04";

/// `EnviarLoteRpsEnvio` for an asynchronous lot.
pub fn build_batch_submission(batch: &Batch) -> Result<String, DocumentError> {
    batch.validate()?;

    let lot_id = batch.element_id();
    let lot_number = batch.lot_number.to_string();
    let count = batch.requests.len().to_string();

    let mut b = XmlBuilder::new();
    b.declaration()?
        .start(
            Operation::BatchSubmission.request_root(),
            &[("xmlns", NFSE_NAMESPACE)],
        )?
        .start("LoteRps", &[("Id", &lot_id), ("versao", LAYOUT_VERSION)])?
        .element("NumeroLote", &lot_number)?;
    rps::write_provider(&mut b, &batch.issuer)?;
    b.element("QuantidadeRps", &count)?.start("ListaRps", &[])?;
    for request in &batch.requests {
        rps::write_rps(&mut b, request)?;
    }
    b.end("ListaRps")?
        .end("LoteRps")?
        .end(Operation::BatchSubmission.request_root())?;
    b.finish()
}

/// `GerarNfseEnvio` for synchronous issuance of a single RPS.
pub fn build_single_issuance(request: &InvoiceRequest) -> Result<String, DocumentError> {
    request.validate()?;

    let mut b = XmlBuilder::new();
    b.declaration()?.start(
        Operation::SingleIssuance.request_root(),
        &[("xmlns", NFSE_NAMESPACE)],
    )?;
    rps::write_rps(&mut b, request)?;
    b.end(Operation::SingleIssuance.request_root())?;
    b.finish()
}

/// `ConsultarLoteRpsEnvio` polling a lot by its protocol.
pub fn build_batch_status_query(protocol: &str, issuer: &Issuer) -> Result<String, DocumentError> {
    if protocol.trim().is_empty() {
        return Err(ValidationError::new("protocol", "is required").into());
    }
    issuer.validate("issuer")?;

    let mut b = XmlBuilder::new();
    b.declaration()?.start(
        Operation::BatchStatusQuery.request_root(),
        &[("xmlns", NFSE_NAMESPACE)],
    )?;
    rps::write_provider(&mut b, issuer)?;
    b.element("Protocolo", protocol.trim())?
        .end(Operation::BatchStatusQuery.request_root())?;
    b.finish()
}

/// `ConsultarNfseRpsEnvio` looking up the NFS-e generated from an RPS.
pub fn build_rps_status_query(rps: &RpsIdentifier, issuer: &Issuer) -> Result<String, DocumentError> {
    rps.validate("rps")?;
    issuer.validate("issuer")?;

    let mut b = XmlBuilder::new();
    b.declaration()?.start(
        Operation::RpsStatusQuery.request_root(),
        &[("xmlns", NFSE_NAMESPACE)],
    )?;
    rps::write_rps_identification(&mut b, rps)?;
    rps::write_provider(&mut b, issuer)?;
    b.end(Operation::RpsStatusQuery.request_root())?;
    b.finish()
}

#[cfg(test)]
mod tests;
