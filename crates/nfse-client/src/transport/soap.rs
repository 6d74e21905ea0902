//! SOAP 1.1 envelope for the ABRASF webservice.
//!
//! The header block and the request document travel as raw XML inside
//! `nfseCabecMsg` and `nfseDadosMsg`, each wrapped in CDATA rather than
//! escaped.

use nfse_core::model::Operation;

use crate::document::NFSE_NAMESPACE;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the operation elements in the SOAP body.
pub const SERVICE_NS: &str = "http://nfse.abrasf.org.br";

/// `<cabecalho>` block sent in `nfseCabecMsg`.
pub fn header_block(layout_version: &str) -> String {
    format!(
        "<cabecalho xmlns=\"{NFSE_NAMESPACE}\" versao=\"{layout_version}\">\
         <versaoDados>{layout_version}</versaoDados></cabecalho>"
    )
}

/// Wrap raw text in CDATA, splitting any `]]>` so the section stays well formed.
pub fn cdata(raw: &str) -> String {
    format!("<![CDATA[{}]]>", raw.replace("]]>", "]]]]><![CDATA[>"))
}

/// `SOAPAction` value: `{base}/{Operation}`.
pub fn soap_action(base: &str, operation: Operation) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        operation.soap_operation()
    )
}

/// Drop a leading `<?xml ...?>` declaration; it may not appear mid-document.
fn strip_declaration(payload: &str) -> &str {
    let trimmed = payload.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

/// Complete envelope for `operation` carrying `header` and `payload`.
pub fn envelope(operation: Operation, header: &str, payload: &str) -> String {
    let op = operation.soap_operation();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soapenv:Envelope xmlns:soapenv=\"{SOAP_ENVELOPE_NS}\" xmlns:nfse=\"{SERVICE_NS}\">\
         <soapenv:Header/>\
         <soapenv:Body>\
         <nfse:{op}Request>\
         <nfseCabecMsg>{}</nfseCabecMsg>\
         <nfseDadosMsg>{}</nfseDadosMsg>\
         </nfse:{op}Request>\
         </soapenv:Body>\
         </soapenv:Envelope>",
        cdata(strip_declaration(header)),
        cdata(strip_declaration(payload)),
    )
}
