//! Interpretation of webservice replies.
//!
//! Replies are indexed structurally and searched by local name, so namespace
//! prefixes, SOAP wrappers and whitespace do not matter. Outcomes are
//! resolved in a fixed order: protocol, issued documents, error messages.
//! Anything else means the webservice has not reached a terminal outcome yet.

use nfse_core::model::{RpsIdentifier, RpsKind, ServiceMessage};
use nfse_core::xml::XmlDocument;
use tracing::{debug, warn};

use crate::transport::RawResponse;

/// Escaped result documents are unwrapped at most this many levels deep.
const MAX_NESTING: usize = 4;

/// Elements that carry the result document as text.
const WRAPPER_ELEMENTS: [&str; 3] = ["outputXML", "return", "RetornoXML"];

/// An NFS-e reported as issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedNfse {
    pub number: String,
    pub verification_code: String,
    pub issued_at: Option<String>,
    /// The RPS this NFS-e was generated from, when the reply names it.
    pub rps: Option<RpsIdentifier>,
}

/// `Situacao` of a lot in `ConsultarLoteRpsResposta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotSituation {
    NotReceived,
    NotProcessed,
    ProcessedWithErrors,
    Processed,
}

impl LotSituation {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::NotReceived),
            "2" => Some(Self::NotProcessed),
            "3" => Some(Self::ProcessedWithErrors),
            "4" => Some(Self::Processed),
            _ => None,
        }
    }
}

/// What the webservice decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Lot received; poll with the protocol.
    Accepted {
        protocol: String,
        received_at: Option<String>,
    },
    Authorized(Vec<IssuedNfse>),
    Rejected(Vec<ServiceMessage>),
    /// No terminal outcome yet.
    Indeterminate,
}

/// A parsed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebserviceResponse {
    pub outcome: Outcome,
    /// Warnings that do not block the request.
    pub alerts: Vec<ServiceMessage>,
    pub lot_situation: Option<LotSituation>,
    /// The reply body as received, before any unwrapping.
    pub raw: String,
    /// Absent when only a body was interpreted.
    pub http_status: Option<u16>,
}

impl WebserviceResponse {
    /// Interpret a transport reply, keeping its body and HTTP status.
    pub fn from_reply(reply: &RawResponse) -> Self {
        Self {
            http_status: Some(reply.status),
            ..parse(&reply.body)
        }
    }
}

/// What a reply document says, without the raw payload.
struct Interpretation {
    outcome: Outcome,
    alerts: Vec<ServiceMessage>,
    lot_situation: Option<LotSituation>,
}

impl Interpretation {
    const fn indeterminate() -> Self {
        Self::outcome(Outcome::Indeterminate)
    }

    const fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            alerts: Vec::new(),
            lot_situation: None,
        }
    }
}

/// Interpret a raw reply body.
pub fn parse(raw: &str) -> WebserviceResponse {
    let Interpretation {
        outcome,
        alerts,
        lot_situation,
    } = parse_nested(raw, 0);
    WebserviceResponse {
        outcome,
        alerts,
        lot_situation,
        raw: raw.to_owned(),
        http_status: None,
    }
}

fn parse_nested(raw: &str, depth: usize) -> Interpretation {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Interpretation::indeterminate();
    }
    let doc = match XmlDocument::parse(trimmed) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "Unparseable webservice reply");
            return Interpretation::indeterminate();
        }
    };

    if let Some(fault) = soap_fault(&doc) {
        return Interpretation::outcome(Outcome::Rejected(vec![fault]));
    }

    if depth < MAX_NESTING {
        if let Some(inner) = nested_document(&doc) {
            debug!(depth, "Unwrapping nested result document");
            return parse_nested(inner, depth + 1);
        }
    }

    interpret(&doc)
}

fn interpret(doc: &XmlDocument<'_>) -> Interpretation {
    let alerts: Vec<ServiceMessage> = doc
        .find_all("MensagemRetorno")
        .into_iter()
        .filter(|&idx| doc.has_ancestor(idx, "ListaMensagemAlertaRetorno"))
        .filter_map(|idx| message_at(doc, idx))
        .collect();
    for alert in &alerts {
        warn!(code = %alert.code, message = %alert.message, "Webservice alert");
    }

    let lot_situation = doc
        .find_first("Situacao")
        .and_then(|idx| LotSituation::from_code(doc.text(idx)));

    let outcome = if let Some(protocol) = protocol(doc) {
        Outcome::Accepted {
            protocol,
            received_at: doc
                .find_first("DataRecebimento")
                .map(|idx| doc.text(idx).to_owned()),
        }
    } else {
        let issued = issued_documents(doc);
        if issued.is_empty() {
            let errors = error_messages(doc);
            if !errors.is_empty() {
                Outcome::Rejected(errors)
            } else if lot_situation == Some(LotSituation::ProcessedWithErrors) {
                Outcome::Rejected(vec![ServiceMessage::new(
                    "situacao.3",
                    "Lot processed with errors",
                )])
            } else {
                Outcome::Indeterminate
            }
        } else {
            Outcome::Authorized(issued)
        }
    };

    Interpretation {
        outcome,
        alerts,
        lot_situation,
    }
}

fn protocol(doc: &XmlDocument<'_>) -> Option<String> {
    doc.find_all("Protocolo")
        .into_iter()
        .map(|idx| doc.text(idx))
        .find(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Every `CodigoVerificacao` paired with a sibling `Numero`.
fn issued_documents(doc: &XmlDocument<'_>) -> Vec<IssuedNfse> {
    doc.find_all("CodigoVerificacao")
        .into_iter()
        .filter_map(|idx| {
            let code = doc.text(idx);
            let parent = doc.element(idx).parent?;
            let number = doc.child_text(parent, "Numero")?;
            if code.is_empty() || number.is_empty() {
                return None;
            }
            Some(IssuedNfse {
                number: number.to_owned(),
                verification_code: code.to_owned(),
                issued_at: doc.child_text(parent, "DataEmissao").map(str::to_owned),
                rps: doc
                    .descendant(parent, "IdentificacaoRps")
                    .and_then(|ident| rps_identifier(doc, ident)),
            })
        })
        .collect()
}

fn rps_identifier(doc: &XmlDocument<'_>, ident: usize) -> Option<RpsIdentifier> {
    let number = doc.child_text(ident, "Numero")?.parse().ok()?;
    let series = doc.child_text(ident, "Serie").unwrap_or_default();
    let kind = match doc.child_text(ident, "Tipo") {
        Some("2") => RpsKind::MixedNote,
        Some("3") => RpsKind::Coupon,
        _ => RpsKind::Rps,
    };
    Some(RpsIdentifier {
        number,
        series: series.to_owned(),
        kind,
    })
}

/// Errors in both shapes the webservices emit: `MensagemRetorno` /
/// `MensagemRetornoLote` blocks, and `ListaMensagemRetorno` holding
/// `Codigo`/`Mensagem` directly.
fn error_messages(doc: &XmlDocument<'_>) -> Vec<ServiceMessage> {
    let mut blocks: Vec<usize> = doc
        .find_all("MensagemRetorno")
        .into_iter()
        .chain(doc.find_all("MensagemRetornoLote"))
        .filter(|&idx| !doc.has_ancestor(idx, "ListaMensagemAlertaRetorno"))
        .collect();
    blocks.extend(
        doc.find_all("ListaMensagemRetorno")
            .into_iter()
            .filter(|&idx| doc.child(idx, "Codigo").is_some() || doc.child(idx, "Mensagem").is_some()),
    );
    blocks.sort_unstable();
    blocks.into_iter().filter_map(|idx| message_at(doc, idx)).collect()
}

fn message_at(doc: &XmlDocument<'_>, idx: usize) -> Option<ServiceMessage> {
    let code = doc.child_text(idx, "Codigo").unwrap_or_default();
    let message = doc.child_text(idx, "Mensagem").unwrap_or_default();
    if code.is_empty() && message.is_empty() {
        return None;
    }
    Some(ServiceMessage {
        code: code.to_owned(),
        message: message.to_owned(),
        correction: doc
            .child_text(idx, "Correcao")
            .filter(|c| !c.is_empty())
            .map(str::to_owned),
    })
}

/// SOAP 1.1 `faultcode`/`faultstring` or SOAP 1.2 `Code`/`Reason`.
fn soap_fault(doc: &XmlDocument<'_>) -> Option<ServiceMessage> {
    let fault = doc.find_first("Fault")?;
    let code = doc
        .child_text(fault, "faultcode")
        .or_else(|| {
            doc.child(fault, "Code")
                .and_then(|c| doc.child_text(c, "Value"))
        })
        .unwrap_or("soap:Fault");
    let message = doc
        .child_text(fault, "faultstring")
        .or_else(|| {
            doc.child(fault, "Reason")
                .and_then(|r| doc.child_text(r, "Text"))
        })
        .unwrap_or_default();
    Some(ServiceMessage::new(code, message))
}

/// Text of the first result wrapper whose content is itself a well-formed
/// XML document. Other leaves may hold markup typed by users (`Discriminacao`)
/// and are never unwrapped.
fn nested_document<'d>(doc: &'d XmlDocument<'_>) -> Option<&'d str> {
    (0..doc.len())
        .filter(|&idx| doc.children(idx).is_empty() && is_result_wrapper(doc, idx))
        .map(|idx| doc.text(idx))
        .find(|text| text.starts_with('<') && XmlDocument::parse(text).is_ok())
}

/// `outputXML`-style elements, `*Result` elements, and direct children of
/// a SOAP operation `*Response`.
fn is_result_wrapper(doc: &XmlDocument<'_>, idx: usize) -> bool {
    let element = doc.element(idx);
    WRAPPER_ELEMENTS.contains(&element.local_name.as_str())
        || element.local_name.ends_with("Result")
        || element
            .parent
            .is_some_and(|parent| doc.element(parent).local_name.ends_with("Response"))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "response_tests.rs"]
mod tests;
