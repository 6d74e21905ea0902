//! RPS (invoice request) and lot value objects.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::round_money;
use crate::error::ValidationError;

/// ABRASF limit on RPS per lot.
pub const MAX_RPS_PER_BATCH: usize = 50;

/// The service provider issuing the invoice (prestador).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issuer {
    /// CNPJ (14 digits) or CPF (11 digits).
    pub cpf_cnpj: String,
    pub municipal_registration: String,
}

impl Issuer {
    pub fn new(cpf_cnpj: impl Into<String>, municipal_registration: impl Into<String>) -> Self {
        Self {
            cpf_cnpj: cpf_cnpj.into(),
            municipal_registration: municipal_registration.into(),
        }
    }

    pub fn validate(&self, field: &str) -> Result<(), ValidationError> {
        validate_tax_id(&format!("{field}.cpf_cnpj"), &self.cpf_cnpj)?;
        require(
            &format!("{field}.municipal_registration"),
            &self.municipal_registration,
        )
    }
}

/// ABRASF RPS type (`Tipo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpsKind {
    #[default]
    Rps,
    MixedNote,
    Coupon,
}

impl RpsKind {
    pub const fn code(&self) -> u8 {
        match self {
            Self::Rps => 1,
            Self::MixedNote => 2,
            Self::Coupon => 3,
        }
    }
}

/// Identifies an RPS; unique per issuer and series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpsIdentifier {
    pub number: u64,
    pub series: String,
    #[serde(default)]
    pub kind: RpsKind,
}

impl RpsIdentifier {
    pub fn new(number: u64, series: impl Into<String>) -> Self {
        Self {
            number,
            series: series.into(),
            kind: RpsKind::Rps,
        }
    }

    /// Value of the `Id` attribute on the RPS declaration block:
    /// `rps{number}_{series}`.
    ///
    /// XML IDs must be NCNames, so every series byte other than an ASCII
    /// letter or digit is written as `-XX` hex. Distinct identifiers always
    /// give distinct IDs.
    pub fn element_id(&self) -> String {
        let mut id = format!("rps{}_", self.number);
        for byte in self.series.bytes() {
            if byte.is_ascii_alphanumeric() {
                id.push(char::from(byte));
            } else {
                id.push_str(&format!("-{byte:02X}"));
            }
        }
        id
    }

    pub fn validate(&self, field: &str) -> Result<(), ValidationError> {
        if self.number == 0 {
            return Err(ValidationError::new(
                format!("{field}.number"),
                "must be greater than zero",
            ));
        }
        require(&format!("{field}.series"), &self.series)?;
        if self.series.chars().count() > 5 {
            return Err(ValidationError::new(
                format!("{field}.series"),
                "must have at most 5 characters",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for RpsIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.series)
    }
}

/// Recipient postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    pub district: String,
    /// IBGE municipality code (7 digits).
    pub municipality_code: String,
    /// Two-letter state code.
    pub state: String,
    /// CEP, digits only.
    pub postal_code: String,
}

impl Address {
    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        require(&format!("{field}.street"), &self.street)?;
        require(&format!("{field}.number"), &self.number)?;
        require(&format!("{field}.district"), &self.district)?;
        validate_municipality(&format!("{field}.municipality_code"), &self.municipality_code)?;
        if self.state.len() != 2 || !self.state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::new(
                format!("{field}.state"),
                "must be a two-letter UF code",
            ));
        }
        if self.postal_code.len() != 8 || !is_digits(&self.postal_code) {
            return Err(ValidationError::new(
                format!("{field}.postal_code"),
                "must be 8 digits",
            ));
        }
        Ok(())
    }
}

/// The service taker (tomador).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// CNPJ (14 digits) or CPF (11 digits).
    pub cpf_cnpj: String,
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Description and classification of the rendered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub description: String,
    /// Item of the federal service list (`ItemListaServico`), e.g. `01.07`.
    pub service_item: String,
    /// Municipal tax-service code, when the municipality requires one.
    #[serde(default)]
    pub municipal_tax_code: Option<String>,
    pub cnae: String,
    /// IBGE code of the municipality where the service was rendered.
    pub municipality_code: String,
    /// ISS withheld by the recipient.
    #[serde(default)]
    pub iss_withheld: bool,
    /// `ExigibilidadeISS` code (1 = taxable).
    #[serde(default = "default_exigibility")]
    pub iss_exigibility: u8,
}

const fn default_exigibility() -> u8 {
    1
}

/// Monetary fields of an RPS. All amounts have 2-digit precision on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceValues {
    pub service_value: Decimal,
    pub deductions: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
    pub inss: Decimal,
    pub ir: Decimal,
    pub csll: Decimal,
    pub other_withholdings: Decimal,
    pub unconditional_discount: Decimal,
    pub conditional_discount: Decimal,
}

impl ServiceValues {
    pub fn new(service_value: Decimal) -> Self {
        Self {
            service_value,
            ..Self::default()
        }
    }

    /// Federal withholdings (PIS, COFINS, INSS, IR, CSLL, others).
    pub fn federal_withholdings(&self) -> Decimal {
        self.pis + self.cofins + self.inss + self.ir + self.csll + self.other_withholdings
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("values.service_value", self.service_value),
            ("values.deductions", self.deductions),
            ("values.pis", self.pis),
            ("values.cofins", self.cofins),
            ("values.inss", self.inss),
            ("values.ir", self.ir),
            ("values.csll", self.csll),
            ("values.other_withholdings", self.other_withholdings),
            ("values.unconditional_discount", self.unconditional_discount),
            ("values.conditional_discount", self.conditional_discount),
        ];
        for (field, value) in fields {
            if value < Decimal::ZERO {
                return Err(ValidationError::new(field, "must not be negative"));
            }
        }
        if self.service_value.is_zero() {
            return Err(ValidationError::new(
                "values.service_value",
                "must be greater than zero",
            ));
        }
        if self.deductions + self.unconditional_discount > self.service_value {
            return Err(ValidationError::new(
                "values.deductions",
                "deductions and unconditional discount exceed the service value",
            ));
        }
        Ok(())
    }
}

/// An RPS to be converted into an NFS-e.
///
/// Derived amounts (calculation base, ISS, net value) are computed from the
/// stored fields and never carried independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub issuer: Issuer,
    pub rps: RpsIdentifier,
    pub issue_date: NaiveDate,
    /// Competence period; any day of the month is accepted.
    pub competence: NaiveDate,
    pub recipient: Recipient,
    pub service: Service,
    pub values: ServiceValues,
    /// ISS rate as a fraction (`0.02` is 2%).
    pub tax_rate: Decimal,
    #[serde(default)]
    pub simples_nacional: bool,
    #[serde(default)]
    pub fiscal_incentive: bool,
}

impl InvoiceRequest {
    /// Service value minus deductions and unconditional discount.
    pub fn calculation_base(&self) -> Decimal {
        self.values.service_value - self.values.deductions - self.values.unconditional_discount
    }

    /// ISS due: calculation base times rate, rounded to cents.
    pub fn iss_amount(&self) -> Decimal {
        round_money(self.calculation_base() * self.tax_rate)
    }

    /// Everything withheld from the provider, ISS included when the recipient withholds it.
    pub fn withheld_total(&self) -> Decimal {
        let iss = if self.service.iss_withheld {
            self.iss_amount()
        } else {
            Decimal::ZERO
        };
        self.values.federal_withholdings() + iss
    }

    /// Net value of the invoice. Always derived.
    pub fn net_value(&self) -> Decimal {
        round_money(
            self.values.service_value
                - self.withheld_total()
                - self.values.unconditional_discount
                - self.values.conditional_discount,
        )
    }

    /// Check every required field; the first failure is returned.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.issuer.validate("issuer")?;
        self.rps.validate("rps")?;
        if self.competence > self.issue_date {
            return Err(ValidationError::new(
                "competence",
                "must not be later than the issue date",
            ));
        }

        validate_tax_id("recipient.cpf_cnpj", &self.recipient.cpf_cnpj)?;
        require("recipient.name", &self.recipient.name)?;
        self.recipient.address.validate("recipient.address")?;

        require("service.description", &self.service.description)?;
        require("service.service_item", &self.service.service_item)?;
        require("service.cnae", &self.service.cnae)?;
        if !is_digits(&self.service.cnae) {
            return Err(ValidationError::new("service.cnae", "must contain digits only"));
        }
        validate_municipality("service.municipality_code", &self.service.municipality_code)?;
        if !(1..=7).contains(&self.service.iss_exigibility) {
            return Err(ValidationError::new(
                "service.iss_exigibility",
                "must be between 1 and 7",
            ));
        }

        self.values.validate()?;
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE {
            return Err(ValidationError::new(
                "tax_rate",
                "must be a fraction between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// A lot of RPS submitted together (lote).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub lot_number: u64,
    pub issuer: Issuer,
    pub requests: Vec<InvoiceRequest>,
    /// Assigned by the webservice once the lot is accepted.
    #[serde(default)]
    pub protocol: Option<String>,
}

impl Batch {
    pub fn new(lot_number: u64, issuer: Issuer, requests: Vec<InvoiceRequest>) -> Self {
        Self {
            lot_number,
            issuer,
            requests,
            protocol: None,
        }
    }

    /// Value of the `Id` attribute on `LoteRps`.
    pub fn element_id(&self) -> String {
        format!("lote{}", self.lot_number)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lot_number == 0 {
            return Err(ValidationError::new(
                "batch.lot_number",
                "must be greater than zero",
            ));
        }
        self.issuer.validate("batch.issuer")?;
        if self.requests.is_empty() {
            return Err(ValidationError::new(
                "batch.requests",
                "a lot needs at least one RPS",
            ));
        }
        if self.requests.len() > MAX_RPS_PER_BATCH {
            return Err(ValidationError::new(
                "batch.requests",
                format!("a lot holds at most {MAX_RPS_PER_BATCH} RPS"),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for request in &self.requests {
            request.validate()?;
            if request.issuer != self.issuer {
                return Err(ValidationError::new(
                    "batch.requests",
                    format!("RPS {} belongs to a different issuer", request.rps),
                ));
            }
            if !seen.insert((request.rps.number, request.rps.series.as_str())) {
                return Err(ValidationError::new(
                    "batch.requests",
                    format!("RPS {} appears more than once", request.rps),
                ));
            }
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    Ok(())
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

fn validate_tax_id(field: &str, value: &str) -> Result<(), ValidationError> {
    require(field, value)?;
    if !is_digits(value) || !(value.len() == 11 || value.len() == 14) {
        return Err(ValidationError::new(
            field,
            "must be a CPF (11 digits) or CNPJ (14 digits)",
        ));
    }
    Ok(())
}

fn validate_municipality(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.len() != 7 || !is_digits(value) {
        return Err(ValidationError::new(field, "must be a 7-digit IBGE code"));
    }
    Ok(())
}

/// Whether a document number is a CNPJ (as opposed to a CPF).
pub fn is_cnpj(cpf_cnpj: &str) -> bool {
    cpf_cnpj.len() == 14
}
