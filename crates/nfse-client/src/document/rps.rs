//! Blocks shared between request documents.

use nfse_core::model::{InvoiceRequest, Issuer, Recipient, RpsIdentifier, format_money, format_rate, is_cnpj};

use super::writer::XmlBuilder;
use crate::error::DocumentError;

/// ABRASF boolean: 1 = yes, 2 = no.
const fn flag(value: bool) -> &'static str {
    if value { "1" } else { "2" }
}

/// RPS `Status`: 1 = normal.
const RPS_STATUS_NORMAL: &str = "1";

/// `ResponsavelRetencao`: 1 = recipient.
const WITHHOLDER_RECIPIENT: &str = "1";

pub(super) fn write_cpf_cnpj(b: &mut XmlBuilder, cpf_cnpj: &str) -> Result<(), DocumentError> {
    let tag = if is_cnpj(cpf_cnpj) { "Cnpj" } else { "Cpf" };
    b.start("CpfCnpj", &[])?.element(tag, cpf_cnpj)?.end("CpfCnpj")?;
    Ok(())
}

pub(super) fn write_provider(b: &mut XmlBuilder, issuer: &Issuer) -> Result<(), DocumentError> {
    b.start("Prestador", &[])?;
    write_cpf_cnpj(b, &issuer.cpf_cnpj)?;
    b.element("InscricaoMunicipal", &issuer.municipal_registration)?
        .end("Prestador")?;
    Ok(())
}

pub(super) fn write_rps_identification(
    b: &mut XmlBuilder,
    rps: &RpsIdentifier,
) -> Result<(), DocumentError> {
    b.start("IdentificacaoRps", &[])?
        .element("Numero", &rps.number.to_string())?
        .element("Serie", &rps.series)?
        .element("Tipo", &rps.kind.code().to_string())?
        .end("IdentificacaoRps")?;
    Ok(())
}

/// `<Rps><InfDeclaracaoPrestacaoServico Id=..>..</InfDeclaracaoPrestacaoServico></Rps>`
pub(super) fn write_rps(b: &mut XmlBuilder, request: &InvoiceRequest) -> Result<(), DocumentError> {
    let id = request.rps.element_id();
    b.start("Rps", &[])?
        .start("InfDeclaracaoPrestacaoServico", &[("Id", &id)])?;

    b.start("Rps", &[])?;
    write_rps_identification(b, &request.rps)?;
    b.element("DataEmissao", &request.issue_date.format("%Y-%m-%d").to_string())?
        .element("Status", RPS_STATUS_NORMAL)?
        .end("Rps")?;

    b.element("Competencia", &request.competence.format("%Y-%m-%d").to_string())?;
    write_service(b, request)?;
    write_provider(b, &request.issuer)?;
    write_recipient(b, &request.recipient)?;

    b.element("OptanteSimplesNacional", flag(request.simples_nacional))?
        .element("IncentivoFiscal", flag(request.fiscal_incentive))?
        .end("InfDeclaracaoPrestacaoServico")?
        .end("Rps")?;
    Ok(())
}

fn write_service(b: &mut XmlBuilder, request: &InvoiceRequest) -> Result<(), DocumentError> {
    let values = &request.values;
    let service = &request.service;

    b.start("Servico", &[])?
        .start("Valores", &[])?
        .element("ValorServicos", &format_money(values.service_value))?
        .element("ValorDeducoes", &format_money(values.deductions))?
        .element("ValorPis", &format_money(values.pis))?
        .element("ValorCofins", &format_money(values.cofins))?
        .element("ValorInss", &format_money(values.inss))?
        .element("ValorIr", &format_money(values.ir))?
        .element("ValorCsll", &format_money(values.csll))?
        .element("OutrasRetencoes", &format_money(values.other_withholdings))?
        .element("ValorIss", &format_money(request.iss_amount()))?
        .element("Aliquota", &format_rate(request.tax_rate))?
        .element("DescontoIncondicionado", &format_money(values.unconditional_discount))?
        .element("DescontoCondicionado", &format_money(values.conditional_discount))?
        .end("Valores")?
        .element("IssRetido", flag(service.iss_withheld))?;
    if service.iss_withheld {
        b.element("ResponsavelRetencao", WITHHOLDER_RECIPIENT)?;
    }
    b.element("ItemListaServico", &service.service_item)?
        .element("CodigoCnae", &service.cnae)?
        .optional("CodigoTributacaoMunicipio", service.municipal_tax_code.as_deref())?
        .element("Discriminacao", &service.description)?
        .element("CodigoMunicipio", &service.municipality_code)?
        .element("ExigibilidadeISS", &service.iss_exigibility.to_string())?
        .element("MunicipioIncidencia", &service.municipality_code)?
        .end("Servico")?;
    Ok(())
}

fn write_recipient(b: &mut XmlBuilder, recipient: &Recipient) -> Result<(), DocumentError> {
    let address = &recipient.address;

    b.start("TomadorServico", &[])?.start("IdentificacaoTomador", &[])?;
    write_cpf_cnpj(b, &recipient.cpf_cnpj)?;
    b.end("IdentificacaoTomador")?
        .element("RazaoSocial", &recipient.name)?
        .start("Endereco", &[])?
        .element("Endereco", &address.street)?
        .element("Numero", &address.number)?
        .optional("Complemento", address.complement.as_deref())?
        .element("Bairro", &address.district)?
        .element("CodigoMunicipio", &address.municipality_code)?
        .element("Uf", &address.state.to_ascii_uppercase())?
        .element("Cep", &address.postal_code)?
        .end("Endereco")?;

    let phone = recipient.phone.as_deref().filter(|v| !v.trim().is_empty());
    let email = recipient.email.as_deref().filter(|v| !v.trim().is_empty());
    if phone.is_some() || email.is_some() {
        b.start("Contato", &[])?
            .optional("Telefone", phone)?
            .optional("Email", email)?
            .end("Contato")?;
    }
    b.end("TomadorServico")?;
    Ok(())
}
