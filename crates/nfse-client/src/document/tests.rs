//! Document builder tests.
#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use nfse_core::model::{Batch, InvoiceRequest, Issuer, RpsIdentifier};
use nfse_core::xml::XmlDocument;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::*;

fn request(value: Decimal) -> InvoiceRequest {
    crate::test_helpers::request(1, value)
}

fn text_of(xml: &str, name: &str) -> String {
    let doc = XmlDocument::parse(xml).unwrap();
    let idx = doc.find_first(name).unwrap_or_else(|| panic!("missing <{name}>"));
    doc.text(idx).to_owned()
}

#[test]
fn amounts_render_with_fixed_precision() {
    for value in [Decimal::from(1500), dec!(1500.00), dec!(1500.000)] {
        let xml = build_single_issuance(&request(value)).unwrap();
        assert_eq!(text_of(&xml, "ValorServicos"), "1500.00");
        assert_eq!(text_of(&xml, "ValorIss"), "30.00");
        assert_eq!(text_of(&xml, "Aliquota"), "0.0200");
        assert_eq!(text_of(&xml, "ValorDeducoes"), "0.00");
    }
}

#[test]
fn integer_and_scaled_inputs_produce_identical_documents() {
    let a = build_single_issuance(&request(Decimal::from(1500))).unwrap();
    let b = build_single_issuance(&request(dec!(1500.00))).unwrap();
    assert_eq!(a, b);
}

#[test]
fn free_text_is_escaped_and_round_trips() {
    let xml = build_single_issuance(&request(dec!(10))).unwrap();
    assert!(xml.contains("Maria &amp; Filhos &lt;Ltda&gt;"));
    assert_eq!(text_of(&xml, "RazaoSocial"), "Maria & Filhos <Ltda>");
    assert_eq!(
        text_of(&xml, "Discriminacao"),
        "Consultoria \"mensal\" em sistemas"
    );
}

#[test]
fn single_issuance_layout() {
    let xml = build_single_issuance(&request(dec!(1500))).unwrap();
    let doc = XmlDocument::parse(&xml).unwrap();
    let root = doc.root();
    assert_eq!(doc.element(root).local_name, "GerarNfseEnvio");
    assert_eq!(
        doc.element(root).attribute("xmlns"),
        None,
        "namespace declarations are not regular attributes"
    );
    assert_eq!(
        doc.in_scope_namespaces(root).get(&None).map(String::as_str),
        Some(NFSE_NAMESPACE)
    );

    let inf = doc.find_first("InfDeclaracaoPrestacaoServico").unwrap();
    assert_eq!(doc.element(inf).attribute("Id"), Some("rps1_A"));
    let provider = doc.child(inf, "Prestador").unwrap();
    let cpf_cnpj = doc.child(provider, "CpfCnpj").unwrap();
    assert_eq!(doc.child_text(cpf_cnpj, "Cnpj"), Some("11222333000181"));

    let recipient = doc.child(inf, "TomadorServico").unwrap();
    let ident = doc.child(recipient, "IdentificacaoTomador").unwrap();
    assert!(doc.descendant(ident, "Cpf").is_some());
    assert_eq!(text_of(&xml, "Uf"), "SP");
    assert_eq!(text_of(&xml, "Email"), "maria@example.com");
    assert!(doc.find_first("Telefone").is_none());
    assert_eq!(text_of(&xml, "IssRetido"), "2");
    assert!(doc.find_first("ResponsavelRetencao").is_none());
}

#[test]
fn withheld_iss_names_the_recipient() {
    let mut req = request(dec!(1000));
    req.service.iss_withheld = true;
    let xml = build_single_issuance(&req).unwrap();
    assert_eq!(text_of(&xml, "IssRetido"), "1");
    assert_eq!(text_of(&xml, "ResponsavelRetencao"), "1");
}

#[test]
fn batch_submission_layout() {
    let first = request(dec!(1500));
    let mut second = request(dec!(200.5));
    second.rps.number = 2;
    let batch = Batch::new(42, first.issuer.clone(), vec![first, second]);

    let xml = build_batch_submission(&batch).unwrap();
    let doc = XmlDocument::parse(&xml).unwrap();
    assert_eq!(doc.element(doc.root()).local_name, "EnviarLoteRpsEnvio");

    let lote = doc.find_first("LoteRps").unwrap();
    assert_eq!(doc.element(lote).attribute("Id"), Some("lote42"));
    assert_eq!(doc.element(lote).attribute("versao"), Some("2.04"));
    assert_eq!(doc.child_text(lote, "NumeroLote"), Some("42"));
    assert_eq!(doc.child_text(lote, "QuantidadeRps"), Some("2"));

    let ids: Vec<_> = doc
        .find_all("InfDeclaracaoPrestacaoServico")
        .into_iter()
        .map(|i| doc.element(i).attribute("Id").unwrap().to_owned())
        .collect();
    assert_eq!(ids, ["rps1_A", "rps2_A"]);

    let values: Vec<_> = doc
        .find_all("ValorServicos")
        .into_iter()
        .map(|i| doc.text(i).to_owned())
        .collect();
    assert_eq!(values, ["1500.00", "200.50"]);
}

#[test]
fn invalid_batch_fails_fast() {
    let batch = Batch::new(1, Issuer::new("11222333000181", "123456"), Vec::new());
    let err = build_batch_submission(&batch).unwrap_err();
    assert!(matches!(err, DocumentError::Validation(ref v) if v.field == "batch.requests"));
}

#[test]
fn missing_recipient_name_fails_fast() {
    let mut req = request(dec!(10));
    req.recipient.name = String::new();
    let err = build_single_issuance(&req).unwrap_err();
    assert!(matches!(err, DocumentError::Validation(ref v) if v.field == "recipient.name"));
}

#[test]
fn batch_status_query_layout() {
    let issuer = Issuer::new("11222333000181", "123456");
    let xml = build_batch_status_query(" 987654 ", &issuer).unwrap();
    let expected = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<ConsultarLoteRpsEnvio xmlns="http://www.abrasf.org.br/nfse.xsd">"#,
        "<Prestador><CpfCnpj><Cnpj>11222333000181</Cnpj></CpfCnpj>",
        "<InscricaoMunicipal>123456</InscricaoMunicipal></Prestador>",
        "<Protocolo>987654</Protocolo></ConsultarLoteRpsEnvio>"
    );
    assert_eq!(xml, expected);
}

#[test]
fn blank_protocol_is_rejected() {
    let issuer = Issuer::new("11222333000181", "123456");
    let err = build_batch_status_query("  ", &issuer).unwrap_err();
    assert!(matches!(err, DocumentError::Validation(ref v) if v.field == "protocol"));
}

#[test]
fn rps_status_query_layout() {
    let issuer = Issuer::new("11222333000181", "123456");
    let xml = build_rps_status_query(&RpsIdentifier::new(7, "B"), &issuer).unwrap();
    let expected = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<ConsultarNfseRpsEnvio xmlns="http://www.abrasf.org.br/nfse.xsd">"#,
        "<IdentificacaoRps><Numero>7</Numero><Serie>B</Serie><Tipo>1</Tipo></IdentificacaoRps>",
        "<Prestador><CpfCnpj><Cnpj>11222333000181</Cnpj></CpfCnpj>",
        "<InscricaoMunicipal>123456</InscricaoMunicipal></Prestador>",
        "</ConsultarNfseRpsEnvio>"
    );
    assert_eq!(xml, expected);
}

#[test]
fn builders_are_deterministic() {
    let req = request(dec!(1500));
    assert_eq!(
        build_single_issuance(&req).unwrap(),
        build_single_issuance(&req).unwrap()
    );
}
