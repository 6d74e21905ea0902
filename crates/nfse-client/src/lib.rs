//! NFS-e Emission Client
//!
//! Builds, signs, transmits and tracks ABRASF 2.04 service invoices against a
//! municipal SOAP webservice.
//!
//! ## Pipeline
//!
//! - **Document**: one builder per operation, compact and deterministic
//! - **Profile**: which elements each operation signs, and where
//! - **Transport**: SOAP 1.1 envelope over mutual TLS, bounded retry with backoff
//! - **Response**: structural interpretation into accepted / authorized / rejected / pending
//! - **Lifecycle**: drives `EmissionRecord`s through `Pending → Submitted → Processing → Authorized | Error`

pub mod document;
pub mod error;
pub mod lifecycle;
pub mod profile;
pub mod response;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use error::{DocumentError, EmissionError, ExchangeError, TransportError, TransportErrorKind};
pub use lifecycle::{EmissionController, StatusQuery};
pub use profile::{SignatureProfile, SignatureStep};
pub use response::{IssuedNfse, LotSituation, Outcome, WebserviceResponse};
pub use transport::{
    HttpReply, HttpsExchange, RawResponse, RetryPolicy, SoapExchange, SoapRequest,
    TransportClient,
};
