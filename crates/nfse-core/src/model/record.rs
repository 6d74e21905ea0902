//! Emission state tracked for each RPS.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::invoice::RpsIdentifier;

/// Emission status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionStatus {
    Pending,
    Submitted,
    Processing,
    Authorized,
    Error,
}

impl EmissionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Authorized => "authorized",
            Self::Error => "error",
        }
    }

    /// No transition leaves `Authorized` or `Error`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Authorized | Self::Error)
    }

    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Submitted | Self::Authorized | Self::Error
            ) | (
                Self::Submitted,
                Self::Processing | Self::Authorized | Self::Error
            ) | (
                Self::Processing,
                Self::Processing | Self::Authorized | Self::Error
            )
        )
    }
}

impl std::fmt::Display for EmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "processing" => Ok(Self::Processing),
            "authorized" => Ok(Self::Authorized),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown emission status: {other}")),
        }
    }
}

/// Webservice operations (ABRASF 2.04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BatchSubmission,
    SingleIssuance,
    BatchStatusQuery,
    RpsStatusQuery,
}

impl Operation {
    pub const ALL: [Self; 4] = [
        Self::BatchSubmission,
        Self::SingleIssuance,
        Self::BatchStatusQuery,
        Self::RpsStatusQuery,
    ];

    /// SOAP operation name; also the suffix of the `SOAPAction` header.
    pub const fn soap_operation(&self) -> &'static str {
        match self {
            Self::BatchSubmission => "RecepcionarLoteRps",
            Self::SingleIssuance => "GerarNfse",
            Self::BatchStatusQuery => "ConsultarLoteRps",
            Self::RpsStatusQuery => "ConsultarNfsePorRps",
        }
    }

    /// Root element of the request document.
    pub const fn request_root(&self) -> &'static str {
        match self {
            Self::BatchSubmission => "EnviarLoteRpsEnvio",
            Self::SingleIssuance => "GerarNfseEnvio",
            Self::BatchStatusQuery => "ConsultarLoteRpsEnvio",
            Self::RpsStatusQuery => "ConsultarNfseRpsEnvio",
        }
    }

    /// Root element of the response document.
    pub const fn response_root(&self) -> &'static str {
        match self {
            Self::BatchSubmission => "EnviarLoteRpsResposta",
            Self::SingleIssuance => "GerarNfseResposta",
            Self::BatchStatusQuery => "ConsultarLoteRpsResposta",
            Self::RpsStatusQuery => "ConsultarNfseRpsResposta",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.soap_operation())
    }
}

/// A code/message pair returned by the webservice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub code: String,
    pub message: String,
    /// Suggested fix (`Correcao`), when provided.
    #[serde(default)]
    pub correction: Option<String>,
}

impl ServiceMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            correction: None,
        }
    }
}

impl std::fmt::Display for ServiceMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(correction) = &self.correction {
            write!(f, " ({correction})")?;
        }
        Ok(())
    }
}

/// One raw request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operation: Operation,
    pub request_xml: String,
    /// Absent when the exchange failed before any response arrived.
    pub response_xml: Option<String>,
    pub http_status: Option<u16>,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Rejected transition between emission states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid emission transition from {from} to {to}")]
pub struct TransitionError {
    pub from: EmissionStatus,
    pub to: EmissionStatus,
}

/// Durable emission state for one RPS, persisted by the caller.
///
/// Only the emission controller mutates a record; this crate never deletes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub id: Uuid,
    pub rps: RpsIdentifier,
    pub lot_number: Option<u64>,
    pub status: EmissionStatus,
    pub protocol: Option<String>,
    pub document_number: Option<String>,
    pub verification_code: Option<String>,
    /// Issue timestamp as reported by the webservice.
    pub issued_at: Option<String>,
    /// Last failure, terminal or not.
    pub last_error: Option<ServiceMessage>,
    /// All messages of the terminal rejection.
    #[serde(default)]
    pub errors: Vec<ServiceMessage>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmissionRecord {
    pub fn new(rps: RpsIdentifier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rps,
            lot_number: None,
            status: EmissionStatus::Pending,
            protocol: None,
            document_number: None,
            verification_code: None,
            issued_at: None,
            last_error: None,
            errors: Vec::new(),
            audit: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: EmissionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Move to terminal `Error`, keeping every message.
    pub fn fail(&mut self, messages: Vec<ServiceMessage>) -> Result<(), TransitionError> {
        self.transition(EmissionStatus::Error)?;
        self.last_error = messages.first().cloned();
        self.errors = messages;
        Ok(())
    }

    /// Store a failure without changing status.
    pub fn record_failure(&mut self, message: ServiceMessage) {
        self.last_error = Some(message);
        self.touch();
    }

    pub fn push_audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
