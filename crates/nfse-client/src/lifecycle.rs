//! Emission lifecycle: build, sign, transmit, interpret, record.
//!
//! ```text
//! Pending ──submit──▶ Submitted ──query──▶ Processing ──query──▶ Authorized
//!    │                    │                    │
//!    └──issue──▶ Authorized / Error            └────────────────▶ Error
//! ```
//!
//! Records are owned and persisted by the caller; the controller only
//! mutates them. Every exchange appends an audit entry to each affected
//! record, and every terminal `Error` carries the originating messages.

use std::sync::Arc;

use chrono::Utc;
use nfse_core::Config;
use nfse_core::ValidationError;
use nfse_core::model::{
    AuditEntry, Batch, EmissionRecord, EmissionStatus, InvoiceRequest, Issuer, Operation,
    RpsIdentifier, ServiceMessage, TransitionError,
};
use nfse_crypto::CertificateBundle;
use tracing::{info, warn};

use crate::document::{
    build_batch_status_query, build_batch_submission, build_rps_status_query,
    build_single_issuance,
};
use crate::error::{EmissionError, TransportError};
use crate::profile::SignatureProfile;
use crate::response::{IssuedNfse, Outcome, WebserviceResponse};
use crate::transport::{HttpsExchange, RawResponse, RetryPolicy, SoapExchange, TransportClient};

/// What to poll for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQuery {
    /// A lot, by the protocol returned on submission.
    Batch { protocol: String },
    /// The NFS-e generated from one RPS.
    Rps(RpsIdentifier),
}

impl StatusQuery {
    const fn operation(&self) -> Operation {
        match self {
            Self::Batch { .. } => Operation::BatchStatusQuery,
            Self::Rps(_) => Operation::RpsStatusQuery,
        }
    }
}

/// Drives emission records through the webservice.
pub struct EmissionController<E> {
    transport: TransportClient<E>,
    bundle: Arc<CertificateBundle>,
    profile: SignatureProfile,
    endpoint: String,
    issuer: Issuer,
}

impl EmissionController<HttpsExchange> {
    /// Controller for the configured environment, authenticated with the
    /// configured certificate.
    pub fn from_config(config: &Config) -> Result<Self, EmissionError> {
        config
            .validate()
            .map_err(|e| EmissionError::Config(e.to_string()))?;

        let path = config
            .certificate
            .path
            .as_deref()
            .ok_or_else(|| EmissionError::Config("certificate.path is not set".into()))?;
        let passphrase = config
            .certificate
            .passphrase
            .as_deref()
            .ok_or_else(|| EmissionError::Config("certificate.passphrase is not set".into()))?;

        let bundle = CertificateBundle::load_from_file(path, passphrase)?;
        bundle.check_expiry(Utc::now(), config.certificate.expiry_warning_days);

        let exchange = HttpsExchange::new(&bundle, &config.transport)?;
        let transport = TransportClient::new(
            exchange,
            RetryPolicy::from_config(&config.transport),
            config.transport.attempt_timeout(),
        )
        .with_soap_action_base(config.webservice.soap_action_base.as_str())
        .with_layout_version(&config.webservice.layout_version);

        info!(
            environment = ?config.environment,
            endpoint = %config.endpoint(),
            "Emission controller ready"
        );

        Ok(Self::new(
            transport,
            Arc::new(bundle),
            config.endpoint(),
            Issuer::new(
                config.issuer.cnpj.as_str(),
                config.issuer.municipal_registration.as_str(),
            ),
        ))
    }
}

impl<E: SoapExchange> EmissionController<E> {
    pub fn new(
        transport: TransportClient<E>,
        bundle: Arc<CertificateBundle>,
        endpoint: impl Into<String>,
        issuer: Issuer,
    ) -> Self {
        Self {
            transport,
            bundle,
            profile: SignatureProfile::default(),
            endpoint: endpoint.into(),
            issuer,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: SignatureProfile) -> Self {
        self.profile = profile;
        self
    }

    pub const fn profile(&self) -> &SignatureProfile {
        &self.profile
    }

    /// Issuer used for status queries.
    pub const fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    /// Submit a lot for asynchronous processing.
    ///
    /// `records` must hold exactly one `Pending` record per RPS in the lot.
    /// On acceptance every record becomes `Submitted` with the protocol, and
    /// the protocol is stored on the batch. When the webservice answers with
    /// issued documents instead, matching records are authorized and the rest
    /// become `Submitted` with the gap recorded, to be polled by RPS. A
    /// rejection, or a reply with no outcome, moves every record to `Error`.
    pub async fn submit_batch(
        &self,
        batch: &mut Batch,
        records: &mut [EmissionRecord],
    ) -> Result<WebserviceResponse, EmissionError> {
        let operation = Operation::BatchSubmission;
        check_batch_records(batch, records)?;

        let unsigned = build_batch_submission(batch)?;
        let signed = self.profile.apply(operation, &unsigned, &self.bundle)?;

        info!(
            lot = batch.lot_number,
            rps_count = batch.requests.len(),
            "Submitting lot"
        );
        let raw = self.transmit(operation, &signed, records).await?;
        let response = WebserviceResponse::from_reply(&raw);

        match &response.outcome {
            Outcome::Accepted { protocol, .. } => {
                for record in records.iter_mut() {
                    record.transition(EmissionStatus::Submitted)?;
                    record.protocol = Some(protocol.clone());
                    record.lot_number = Some(batch.lot_number);
                }
                batch.protocol = Some(protocol.clone());
                info!(lot = batch.lot_number, %protocol, "Lot accepted");
                Ok(response)
            }
            Outcome::Authorized(documents) => {
                for record in records.iter_mut() {
                    record.lot_number = Some(batch.lot_number);
                }
                let applied = apply_documents(documents, records)?;
                for record in records
                    .iter_mut()
                    .filter(|r| r.status == EmissionStatus::Pending)
                {
                    warn!(
                        rps = %record.rps,
                        lot = batch.lot_number,
                        "Lot reply has no NFS-e for RPS"
                    );
                    record.transition(EmissionStatus::Submitted)?;
                    record.record_failure(ServiceMessage::new(
                        "response.missing_document",
                        format!("{operation} reply carried no NFS-e for RPS {}", record.rps),
                    ));
                }
                info!(lot = batch.lot_number, applied, "Lot processed on submission");
                Ok(response)
            }
            Outcome::Rejected(messages) => Err(reject(operation, messages, records)?),
            Outcome::Indeterminate => Err(inconclusive(operation, raw, records)?),
        }
    }

    /// Poll a submitted lot or RPS.
    ///
    /// `Authorized` documents are matched to records by RPS; a rejection
    /// moves every record to `Error`; anything else leaves submitted records
    /// `Processing` for the caller to poll again.
    pub async fn query_status(
        &self,
        query: &StatusQuery,
        records: &mut [EmissionRecord],
    ) -> Result<WebserviceResponse, EmissionError> {
        let operation = query.operation();
        for record in records.iter() {
            if record.status.is_terminal() {
                return Err(TransitionError {
                    from: record.status,
                    to: EmissionStatus::Processing,
                }
                .into());
            }
        }

        let unsigned = match query {
            StatusQuery::Batch { protocol } => build_batch_status_query(protocol, &self.issuer)?,
            StatusQuery::Rps(rps) => build_rps_status_query(rps, &self.issuer)?,
        };
        let signed = self.profile.apply(operation, &unsigned, &self.bundle)?;

        let raw = self.transmit(operation, &signed, records).await?;
        let response = WebserviceResponse::from_reply(&raw);

        match &response.outcome {
            Outcome::Authorized(documents) => {
                let applied = apply_documents(documents, records)?;
                for record in records.iter_mut().filter(|r| !r.status.is_terminal()) {
                    warn!(rps = %record.rps, "No NFS-e reported for RPS");
                    advance_to_processing(record)?;
                }
                info!(%operation, applied, "Status query authorized documents");
                Ok(response)
            }
            Outcome::Rejected(messages) => Err(reject(operation, messages, records)?),
            Outcome::Accepted { .. } | Outcome::Indeterminate => {
                if !raw.is_success() {
                    return Err(inconclusive(operation, raw, records)?);
                }
                for record in records.iter_mut() {
                    advance_to_processing(record)?;
                }
                info!(%operation, situation = ?response.lot_situation, "Still processing");
                Ok(response)
            }
        }
    }

    /// Issue one NFS-e synchronously. The record ends `Authorized` or `Error`.
    pub async fn issue_synchronously(
        &self,
        request: &InvoiceRequest,
        record: &mut EmissionRecord,
    ) -> Result<WebserviceResponse, EmissionError> {
        let operation = Operation::SingleIssuance;
        if record.rps != request.rps {
            return Err(ValidationError::new("record.rps", "does not match the request RPS").into());
        }
        if record.status != EmissionStatus::Pending {
            return Err(TransitionError {
                from: record.status,
                to: EmissionStatus::Authorized,
            }
            .into());
        }

        let unsigned = build_single_issuance(request)?;
        let signed = self.profile.apply(operation, &unsigned, &self.bundle)?;

        info!(rps = %request.rps, "Issuing NFS-e");
        let records = std::slice::from_mut(record);
        let raw = self.transmit(operation, &signed, records).await?;
        let response = WebserviceResponse::from_reply(&raw);

        match &response.outcome {
            Outcome::Authorized(documents) => {
                let document = documents
                    .iter()
                    .find(|d| same_rps(d, &request.rps))
                    .or_else(|| documents.iter().find(|d| d.rps.is_none()));
                let Some(document) = document else {
                    let detail = format!("{operation} reply issued NFS-e for another RPS");
                    warn!(rps = %request.rps, "{detail}");
                    let failure = ServiceMessage::new("response.rps_mismatch", detail.clone());
                    for record in records.iter_mut() {
                        record.fail(vec![failure.clone()])?;
                    }
                    return Err(EmissionError::UnexpectedResponse { operation, detail });
                };
                for record in records.iter_mut() {
                    authorize(record, document)?;
                }
                Ok(response)
            }
            Outcome::Rejected(messages) => Err(reject(operation, messages, records)?),
            Outcome::Accepted { .. } | Outcome::Indeterminate => {
                Err(inconclusive(operation, raw, records)?)
            }
        }
    }

    /// Send one request, appending the exchange to every record's audit trail.
    async fn transmit(
        &self,
        operation: Operation,
        request_xml: &str,
        records: &mut [EmissionRecord],
    ) -> Result<RawResponse, EmissionError> {
        match self
            .transport
            .send(&self.endpoint, operation, request_xml)
            .await
        {
            Ok(raw) => {
                let entry = AuditEntry {
                    operation,
                    request_xml: request_xml.to_owned(),
                    response_xml: Some(raw.body.clone()),
                    http_status: Some(raw.status),
                    attempts: raw.attempts,
                    at: Utc::now(),
                };
                for record in records.iter_mut() {
                    record.push_audit(entry.clone());
                }
                Ok(raw)
            }
            Err(e) => {
                warn!(error = %e, %operation, attempts = e.attempts(), "Exchange failed");
                let entry = AuditEntry {
                    operation,
                    request_xml: request_xml.to_owned(),
                    response_xml: None,
                    http_status: None,
                    attempts: e.attempts(),
                    at: Utc::now(),
                };
                let failure = ServiceMessage::new(e.code(), e.to_string());
                for record in records.iter_mut() {
                    record.push_audit(entry.clone());
                    record.record_failure(failure.clone());
                }
                Err(e.into())
            }
        }
    }
}

/// One `Pending` record per RPS in the lot, and nothing else.
fn check_batch_records(batch: &Batch, records: &[EmissionRecord]) -> Result<(), EmissionError> {
    let matches = records.len() == batch.requests.len()
        && batch
            .requests
            .iter()
            .all(|req| records.iter().any(|r| r.rps == req.rps));
    if !matches {
        return Err(ValidationError::new(
            "records",
            "must hold exactly one record per RPS in the lot",
        )
        .into());
    }
    if let Some(record) = records
        .iter()
        .find(|r| r.status != EmissionStatus::Pending)
    {
        return Err(TransitionError {
            from: record.status,
            to: EmissionStatus::Submitted,
        }
        .into());
    }
    Ok(())
}

fn same_rps(document: &IssuedNfse, rps: &RpsIdentifier) -> bool {
    document
        .rps
        .as_ref()
        .is_some_and(|r| r.number == rps.number && r.series == rps.series)
}

fn authorize(record: &mut EmissionRecord, document: &IssuedNfse) -> Result<(), TransitionError> {
    record.transition(EmissionStatus::Authorized)?;
    record.document_number = Some(document.number.clone());
    record.verification_code = Some(document.verification_code.clone());
    record.issued_at.clone_from(&document.issued_at);
    info!(
        rps = %record.rps,
        number = %document.number,
        verification_code = %document.verification_code,
        "NFS-e authorized"
    );
    Ok(())
}

/// Authorize every record with a matching document. A lone document is
/// matched to a lone record even when the reply omits the RPS.
fn apply_documents(
    documents: &[IssuedNfse],
    records: &mut [EmissionRecord],
) -> Result<usize, TransitionError> {
    let lone = documents.len() == 1 && records.len() == 1;
    let mut applied = 0;
    for record in records.iter_mut() {
        let document = documents
            .iter()
            .find(|d| same_rps(d, &record.rps))
            .or_else(|| if lone { documents.first() } else { None });
        if let Some(document) = document {
            authorize(record, document)?;
            applied += 1;
        }
    }
    Ok(applied)
}

fn advance_to_processing(record: &mut EmissionRecord) -> Result<(), TransitionError> {
    if matches!(
        record.status,
        EmissionStatus::Submitted | EmissionStatus::Processing
    ) {
        record.transition(EmissionStatus::Processing)?;
    }
    Ok(())
}

/// Move every record to `Error` with the webservice messages.
fn reject(
    operation: Operation,
    messages: &[ServiceMessage],
    records: &mut [EmissionRecord],
) -> Result<EmissionError, TransitionError> {
    for message in messages {
        warn!(%operation, code = %message.code, message = %message.message, "Rejected");
    }
    for record in records.iter_mut() {
        record.fail(messages.to_vec())?;
    }
    Ok(EmissionError::BusinessRejection(messages.to_vec()))
}

/// A reply without the outcome the operation requires.
///
/// A non-success HTTP status leaves the records untouched apart from the
/// failure, since the request may not have reached the service. A success
/// status means the service answered without a decision, which ends the
/// records in `Error`.
fn inconclusive(
    operation: Operation,
    raw: RawResponse,
    records: &mut [EmissionRecord],
) -> Result<EmissionError, TransitionError> {
    if !raw.is_success() {
        let err = TransportError::Http {
            status: raw.status,
            body: raw.body,
        };
        warn!(%operation, status = raw.status, "Webservice returned an HTTP error");
        let failure = ServiceMessage::new(err.code(), err.to_string());
        for record in records.iter_mut() {
            record.record_failure(failure.clone());
        }
        return Ok(err.into());
    }

    let detail = format!("{operation} reply carried no protocol, document or error");
    warn!(%operation, "{detail}");
    let failure = ServiceMessage::new("response.indeterminate", detail.clone());
    for record in records.iter_mut() {
        record.fail(vec![failure.clone()])?;
    }
    Ok(EmissionError::UnexpectedResponse { operation, detail })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "lifecycle_tests.rs"]
mod tests;
