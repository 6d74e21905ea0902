//! NFS-e domain model.

pub mod invoice;
pub mod money;
pub mod record;

pub use invoice::{
    Address, Batch, InvoiceRequest, Issuer, MAX_RPS_PER_BATCH, Recipient, RpsIdentifier, RpsKind,
    Service, ServiceValues, is_cnpj,
};
pub use money::{format_money, format_rate, round_money};
pub use record::{
    AuditEntry, EmissionRecord, EmissionStatus, Operation, ServiceMessage, TransitionError,
};

