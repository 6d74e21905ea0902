//! Single HTTP exchange with the webservice.

use std::error::Error as StdError;
use std::io::ErrorKind;

use async_trait::async_trait;
use nfse_core::config::TransportConfig;
use nfse_core::model::Operation;
use nfse_crypto::CertificateBundle;
use reqwest::header::CONTENT_TYPE;

use crate::error::{ExchangeError, TransportError, TransportErrorKind};

/// A fully prepared SOAP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    pub url: String,
    pub operation: Operation,
    pub soap_action: String,
    pub envelope: String,
}

/// Any HTTP response, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// One POST attempt. Implementations do not retry.
#[async_trait]
pub trait SoapExchange: Send + Sync {
    async fn post(&self, request: &SoapRequest) -> Result<HttpReply, ExchangeError>;
}

#[async_trait]
impl<T: SoapExchange + ?Sized> SoapExchange for std::sync::Arc<T> {
    async fn post(&self, request: &SoapRequest) -> Result<HttpReply, ExchangeError> {
        (**self).post(request).await
    }
}

/// HTTPS exchange authenticated with the client certificate (mutual TLS).
#[derive(Debug, Clone)]
pub struct HttpsExchange {
    http: reqwest::Client,
}

impl HttpsExchange {
    pub fn new(bundle: &CertificateBundle, config: &TransportConfig) -> Result<Self, TransportError> {
        // reqwest is built with rustls-no-provider; an `Err` here only means a
        // provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let pem = bundle
            .client_identity_pem()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| TransportError::Setup(format!("client identity: {}", error_chain(&e))))?;

        let http = reqwest::Client::builder()
            .identity(identity)
            .timeout(config.attempt_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransportError::Setup(error_chain(&e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl SoapExchange for HttpsExchange {
    async fn post(&self, request: &SoapRequest) -> Result<HttpReply, ExchangeError> {
        let response = self
            .http
            .post(&request.url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{}\"", request.soap_action))
            .body(request.envelope.clone())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(&e))?;
        Ok(HttpReply { status, body })
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(err: &reqwest::Error) -> ExchangeError {
    let message = format!("{err} ({})", error_chain(err));
    if err.is_timeout() {
        return ExchangeError::new(TransportErrorKind::Timeout, message);
    }
    ExchangeError::new(classify_chain(err), message)
}

/// Inspect the `source()` chain for the underlying cause.
fn classify_chain(err: &(dyn StdError + 'static)) -> TransportErrorKind {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    return TransportErrorKind::ConnectionReset;
                }
                ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
                ErrorKind::BrokenPipe => return TransportErrorKind::BrokenPipe,
                ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        if e.downcast_ref::<rustls::Error>().is_some() {
            return TransportErrorKind::Tls;
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportErrorKind::Dns;
        }
        if text.contains("handshake") || text.contains("certificate") {
            return TransportErrorKind::Tls;
        }
        current = e.source();
    }
    TransportErrorKind::Other
}

/// Walk the `source()` chain of an error and join into a single string.
pub(crate) fn error_chain(err: &dyn StdError) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    if chain.is_empty() {
        String::from("(no further details)")
    } else {
        chain.join(" -> ")
    }
}
