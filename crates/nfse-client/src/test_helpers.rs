//! Shared fixtures for the client's unit tests.
#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use nfse_core::model::{
    Address, Batch, InvoiceRequest, Issuer, Recipient, RpsIdentifier, Service, ServiceValues,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub fn issuer() -> Issuer {
    Issuer::new("11222333000181", "123456")
}

/// A valid request for RPS `number`/A worth `value` at a 2% rate.
pub fn request(number: u64, value: Decimal) -> InvoiceRequest {
    InvoiceRequest {
        issuer: issuer(),
        rps: RpsIdentifier::new(number, "A"),
        issue_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        competence: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        recipient: Recipient {
            cpf_cnpj: "12345678909".into(),
            name: "Maria & Filhos <Ltda>".into(),
            address: Address {
                street: "Rua das Flores".into(),
                number: "100".into(),
                complement: Some("Sala 2".into()),
                district: "Centro".into(),
                municipality_code: "3550308".into(),
                state: "sp".into(),
                postal_code: "01001000".into(),
            },
            email: Some("maria@example.com".into()),
            phone: None,
        },
        service: Service {
            description: "Consultoria \"mensal\" em sistemas".into(),
            service_item: "01.07".into(),
            municipal_tax_code: None,
            cnae: "6204000".into(),
            municipality_code: "3550308".into(),
            iss_withheld: false,
            iss_exigibility: 1,
        },
        values: ServiceValues::new(value),
        tax_rate: dec!(0.02),
        simples_nacional: false,
        fiscal_incentive: false,
    }
}

/// Lot 42 holding one request per RPS number.
pub fn batch(numbers: &[u64]) -> Batch {
    Batch::new(
        42,
        issuer(),
        numbers.iter().map(|&n| request(n, dec!(1500.00))).collect(),
    )
}
