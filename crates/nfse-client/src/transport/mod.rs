//! SOAP transport with bounded retry.
//!
//! Each attempt is bounded by its own timeout. Transient failures are retried
//! with exponential backoff until the attempt limit; anything else, and every
//! HTTP response whatever its status, is returned to the caller at once.

mod exchange;
mod retry;
pub mod soap;

use std::time::Duration;

use nfse_core::model::Operation;
use tokio::time::sleep;
use tracing::{debug, error, warn};

pub use exchange::{HttpReply, HttpsExchange, SoapExchange, SoapRequest};
pub use retry::RetryPolicy;

use crate::error::{ExchangeError, TransportError, TransportErrorKind};

/// Raw webservice reply and the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

impl RawResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Envelope construction plus retrying delivery over a [`SoapExchange`].
pub struct TransportClient<E> {
    exchange: E,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    soap_action_base: String,
    header: String,
}

impl<E: SoapExchange> TransportClient<E> {
    pub fn new(exchange: E, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            exchange,
            policy,
            attempt_timeout,
            soap_action_base: soap::SERVICE_NS.to_string(),
            header: soap::header_block(crate::document::LAYOUT_VERSION),
        }
    }

    #[must_use]
    pub fn with_soap_action_base(mut self, base: impl Into<String>) -> Self {
        self.soap_action_base = base.into();
        self
    }

    #[must_use]
    pub fn with_layout_version(mut self, version: &str) -> Self {
        self.header = soap::header_block(version);
        self
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wrap `payload` for `operation` and POST it to `url`.
    pub async fn send(
        &self,
        url: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<RawResponse, TransportError> {
        let request = SoapRequest {
            url: url.to_string(),
            operation,
            soap_action: soap::soap_action(&self.soap_action_base, operation),
            envelope: soap::envelope(operation, &self.header, payload),
        };
        self.execute(&request).await
    }

    /// POST a prepared request, retrying transient failures.
    pub async fn execute(&self, request: &SoapRequest) -> Result<RawResponse, TransportError> {
        let operation = request.operation.soap_operation();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let outcome =
                match tokio::time::timeout(self.attempt_timeout, self.exchange.post(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExchangeError::new(
                        TransportErrorKind::Timeout,
                        format!("no response within {}ms", self.attempt_timeout.as_millis()),
                    )),
                };

            match outcome {
                Ok(reply) => {
                    debug!(operation, status = reply.status, attempt, "Webservice replied");
                    return Ok(RawResponse {
                        status: reply.status,
                        body: reply.body,
                        attempts: attempt,
                    });
                }
                Err(e) if !e.kind.is_transient() => {
                    error!(error = %e, operation, attempt, "Webservice call failed");
                    return Err(TransportError::Fatal {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    if !self.policy.should_retry(attempt) {
                        error!(error = %e, operation, attempt, "Max attempts reached");
                        return Err(TransportError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    warn!(
                        error = %e,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Retrying webservice call"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Replays scripted outcomes and records when each attempt started.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<HttpReply, ExchangeError>>>,
        started: Mutex<Vec<tokio::time::Instant>>,
        requests: Mutex<Vec<SoapRequest>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<HttpReply, ExchangeError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                started: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SoapExchange for Scripted {
        async fn post(&self, request: &SoapRequest) -> Result<HttpReply, ExchangeError> {
            self.started.lock().unwrap().push(tokio::time::Instant::now());
            self.requests.lock().unwrap().push(request.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExchangeError::new(TransportErrorKind::Other, "script exhausted")))
        }
    }

    /// Never answers; exercises the per-attempt timeout.
    struct Silent;

    #[async_trait]
    impl SoapExchange for Silent {
        async fn post(&self, _request: &SoapRequest) -> Result<HttpReply, ExchangeError> {
            std::future::pending().await
        }
    }

    fn reset() -> Result<HttpReply, ExchangeError> {
        Err(ExchangeError::new(TransportErrorKind::ConnectionReset, "reset"))
    }

    fn ok() -> Result<HttpReply, ExchangeError> {
        Ok(HttpReply {
            status: 200,
            body: "<ok/>".into(),
        })
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let client = TransportClient::new(
            Scripted::new(vec![reset(), reset(), reset(), ok()]),
            policy(5),
            Duration::from_secs(30),
        );
        let response = client
            .send("https://ws.example", Operation::BatchSubmission, "<x/>")
            .await
            .unwrap();
        assert_eq!(response.attempts, 4);
        assert_eq!(response.body, "<ok/>");

        let started = client.exchange.started.lock().unwrap().clone();
        let gaps: Vec<_> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_not_retried() {
        let client = TransportClient::new(
            Scripted::new(vec![
                Err(ExchangeError::new(TransportErrorKind::Tls, "bad certificate")),
                ok(),
            ]),
            policy(5),
            Duration::from_secs(30),
        );
        let err = client
            .send("https://ws.example", Operation::SingleIssuance, "<x/>")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Fatal { attempts: 1, .. }));
        assert_eq!(client.exchange.started.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_last_cause() {
        let client = TransportClient::new(
            Scripted::new(vec![
                reset(),
                Err(ExchangeError::new(TransportErrorKind::Dns, "no such host")),
            ]),
            policy(2),
            Duration::from_secs(30),
        );
        let err = client
            .send("https://ws.example", Operation::BatchStatusQuery, "<x/>")
            .await
            .unwrap_err();
        match err {
            TransportError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last.kind, TransportErrorKind::Dns);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn http_errors_are_returned_not_retried() {
        let client = TransportClient::new(
            Scripted::new(vec![Ok(HttpReply {
                status: 500,
                body: "<Fault/>".into(),
            })]),
            policy(3),
            Duration::from_secs(30),
        );
        let response = client
            .send("https://ws.example", Operation::BatchSubmission, "<x/>")
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert!(!response.is_success());
        assert_eq!(response.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_counts_as_transient() {
        let client = TransportClient::new(Silent, policy(2), Duration::from_secs(5));
        let err = client
            .send("https://ws.example", Operation::BatchSubmission, "<x/>")
            .await
            .unwrap_err();
        match err {
            TransportError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last.kind, TransportErrorKind::Timeout);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_carries_action_and_envelope() {
        let client = TransportClient::new(
            Scripted::new(vec![ok()]),
            policy(1),
            Duration::from_secs(30),
        )
        .with_soap_action_base("http://ws.example/nfse/");
        client
            .send("https://ws.example", Operation::RpsStatusQuery, "<ConsultarNfseRpsEnvio/>")
            .await
            .unwrap();
        let sent = client.exchange.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.soap_action, "http://ws.example/nfse/ConsultarNfsePorRps");
        assert!(sent.envelope.contains("<nfse:ConsultarNfsePorRpsRequest>"));
        assert!(sent.envelope.contains("<![CDATA[<ConsultarNfseRpsEnvio/>]]>"));
    }
}
