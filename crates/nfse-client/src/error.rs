//! Error types for the emission client.

use nfse_core::ValidationError;
use nfse_core::model::{Operation, ServiceMessage, TransitionError};
use nfse_crypto::{CertificateError, SigningError};

/// Errors building a request document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("XML write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("Document is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Failure class of a single transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionReset,
    Timeout,
    ConnectionRefused,
    Dns,
    BrokenPipe,
    /// TLS handshake rejected (bad or untrusted client certificate).
    Tls,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::Dns => "dns",
            Self::BrokenPipe => "broken_pipe",
            Self::Tls => "tls",
            Self::Other => "other",
        }
    }

    /// Only these failures are retried.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionReset
                | Self::Timeout
                | Self::ConnectionRefused
                | Self::Dns
                | Self::BrokenPipe
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed HTTP exchange attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExchangeError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Transport failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient failures exhausted the retry bound; carries the last cause.
    #[error("Transport failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: ExchangeError },

    /// A failure outside the retryable set; surfaced without retrying.
    #[error("Transport failed: {last}")]
    Fatal { attempts: u32, last: ExchangeError },

    /// Non-success HTTP status without a recognizable webservice reply.
    #[error("HTTP error ({status}) from webservice")]
    Http { status: u16, body: String },

    /// The HTTP client could not be built.
    #[error("Transport setup failed: {0}")]
    Setup(String),
}

impl TransportError {
    /// Attempts made before giving up.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
            Self::Http { .. } => 1,
            Self::Setup(_) => 0,
        }
    }

    /// Code recorded on the emission record.
    pub fn code(&self) -> String {
        match self {
            Self::Exhausted { last, .. } | Self::Fatal { last, .. } => {
                format!("transport.{}", last.kind)
            }
            Self::Http { status, .. } => format!("http.{status}"),
            Self::Setup(_) => "transport.setup".into(),
        }
    }
}

/// Errors from the emission lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum EmissionError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The webservice rejected the content.
    #[error("Rejected by webservice: {}", format_messages(.0))]
    BusinessRejection(Vec<ServiceMessage>),

    /// A terminal outcome was expected but the webservice gave none.
    #[error("Unexpected response to {operation}: {detail}")]
    UnexpectedResponse { operation: Operation, detail: String },

    #[error(transparent)]
    InvalidState(#[from] TransitionError),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DocumentError> for EmissionError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation(v) => Self::Validation(v),
            other => Self::Document(other.to_string()),
        }
    }
}

fn format_messages(messages: &[ServiceMessage]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
