//! Tests for the reply interpreter.

use super::*;

const NS: &str = "http://www.abrasf.org.br/nfse.xsd";

fn messages(outcome: &Outcome) -> &[ServiceMessage] {
    match outcome {
        Outcome::Rejected(messages) => messages,
        other => panic!("expected rejection, got {other:?}"),
    }
}

// --- Terminal outcomes ---

#[test]
fn protocol_means_accepted() {
    let raw = format!(
        r#"<EnviarLoteRpsResposta xmlns="{NS}">
            <NumeroLote>42</NumeroLote>
            <DataRecebimento>2024-03-10T10:15:00</DataRecebimento>
            <Protocolo>PROT-0001</Protocolo>
        </EnviarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    assert_eq!(
        response.outcome,
        Outcome::Accepted {
            protocol: "PROT-0001".into(),
            received_at: Some("2024-03-10T10:15:00".into()),
        }
    );
    assert!(response.alerts.is_empty());
}

#[test]
fn number_and_verification_code_mean_authorized() {
    let raw = format!(
        r#"<ConsultarLoteRpsResposta xmlns="{NS}">
            <Situacao>4</Situacao>
            <ListaNfse><CompNfse><Nfse versao="2.04"><InfNfse Id="nfse123">
                <Numero>123</Numero>
                <CodigoVerificacao>ABC123</CodigoVerificacao>
                <DataEmissao>2024-03-10T11:00:00</DataEmissao>
                <DeclaracaoPrestacaoServico><InfDeclaracaoPrestacaoServico>
                    <Rps><IdentificacaoRps><Numero>7</Numero><Serie>A</Serie><Tipo>1</Tipo></IdentificacaoRps></Rps>
                </InfDeclaracaoPrestacaoServico></DeclaracaoPrestacaoServico>
            </InfNfse></Nfse></CompNfse></ListaNfse>
        </ConsultarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    assert_eq!(response.lot_situation, Some(LotSituation::Processed));
    match response.outcome {
        Outcome::Authorized(docs) => {
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].number, "123");
            assert_eq!(docs[0].verification_code, "ABC123");
            assert_eq!(docs[0].issued_at.as_deref(), Some("2024-03-10T11:00:00"));
            assert_eq!(docs[0].rps, Some(RpsIdentifier::new(7, "A")));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn several_documents_are_all_reported() {
    let raw = format!(
        r#"<ListaNfse xmlns="{NS}">
            <CompNfse><Nfse><InfNfse><Numero>1</Numero><CodigoVerificacao>AAA</CodigoVerificacao></InfNfse></Nfse></CompNfse>
            <CompNfse><Nfse><InfNfse><Numero>2</Numero><CodigoVerificacao>BBB</CodigoVerificacao></InfNfse></Nfse></CompNfse>
        </ListaNfse>"#
    );
    match parse(&raw).outcome {
        Outcome::Authorized(docs) => {
            let numbers: Vec<_> = docs.iter().map(|d| d.number.as_str()).collect();
            assert_eq!(numbers, ["1", "2"]);
            assert!(docs.iter().all(|d| d.rps.is_none()));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn message_blocks_mean_rejected() {
    let raw = format!(
        r#"<EnviarLoteRpsResposta xmlns="{NS}">
            <ListaMensagemRetorno>
                <MensagemRetorno>
                    <Codigo>E160</Codigo>
                    <Mensagem>CNPJ do prestador invalido</Mensagem>
                    <Correcao>Informe um CNPJ valido</Correcao>
                </MensagemRetorno>
                <MensagemRetorno><Codigo>E4</Codigo><Mensagem>RPS ja informado</Mensagem></MensagemRetorno>
            </ListaMensagemRetorno>
        </EnviarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    let errors = messages(&response.outcome);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].code, "E160");
    assert_eq!(errors[0].correction.as_deref(), Some("Informe um CNPJ valido"));
    assert_eq!(errors[1].code, "E4");
    assert_eq!(errors[1].correction, None);
}

#[test]
fn flat_message_list_means_rejected() {
    let raw = format!(
        r#"<GerarNfseResposta xmlns="{NS}">
            <ListaMensagemRetorno><Codigo>L18</Codigo><Mensagem>Assinatura invalida</Mensagem></ListaMensagemRetorno>
        </GerarNfseResposta>"#
    );
    let errors = parse(&raw).outcome;
    assert_eq!(
        messages(&errors),
        [ServiceMessage::new("L18", "Assinatura invalida")]
    );
}

#[test]
fn lot_message_blocks_mean_rejected() {
    let raw = format!(
        r#"<ConsultarLoteRpsResposta xmlns="{NS}">
            <Situacao>3</Situacao>
            <ListaMensagemRetornoLote>
                <MensagemRetornoLote>
                    <IdentificacaoRps><Numero>7</Numero><Serie>A</Serie><Tipo>1</Tipo></IdentificacaoRps>
                    <Codigo>E10</Codigo><Mensagem>Aliquota invalida</Mensagem>
                </MensagemRetornoLote>
            </ListaMensagemRetornoLote>
        </ConsultarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    assert_eq!(response.lot_situation, Some(LotSituation::ProcessedWithErrors));
    assert_eq!(messages(&response.outcome)[0].code, "E10");
}

#[test]
fn processed_with_errors_without_messages_is_rejected() {
    let raw = format!(r#"<ConsultarLoteRpsResposta xmlns="{NS}"><Situacao>3</Situacao></ConsultarLoteRpsResposta>"#);
    let response = parse(&raw);
    assert_eq!(messages(&response.outcome)[0].code, "situacao.3");
}

#[test]
fn alerts_are_not_errors() {
    let raw = format!(
        r#"<EnviarLoteRpsResposta xmlns="{NS}">
            <Protocolo>P1</Protocolo>
            <ListaMensagemAlertaRetorno>
                <MensagemRetorno><Codigo>A1</Codigo><Mensagem>Campo descontinuado</Mensagem></MensagemRetorno>
            </ListaMensagemAlertaRetorno>
        </EnviarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    assert!(matches!(response.outcome, Outcome::Accepted { .. }));
    assert_eq!(response.alerts, [ServiceMessage::new("A1", "Campo descontinuado")]);
}

#[test]
fn alerts_alone_leave_outcome_open() {
    let raw = format!(
        r#"<ConsultarLoteRpsResposta xmlns="{NS}">
            <ListaMensagemAlertaRetorno>
                <MensagemRetorno><Codigo>A1</Codigo><Mensagem>Aviso</Mensagem></MensagemRetorno>
            </ListaMensagemAlertaRetorno>
        </ConsultarLoteRpsResposta>"#
    );
    let response = parse(&raw);
    assert_eq!(response.outcome, Outcome::Indeterminate);
    assert_eq!(response.alerts.len(), 1);
}

// --- Faults and wrappers ---

#[test]
fn soap11_fault_is_rejected() {
    let raw = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
        <soap:Body><soap:Fault>
            <faultcode>soap:Server</faultcode>
            <faultstring>Erro interno</faultstring>
        </soap:Fault></soap:Body>
    </soap:Envelope>"#;
    assert_eq!(
        messages(&parse(raw).outcome),
        [ServiceMessage::new("soap:Server", "Erro interno")]
    );
}

#[test]
fn soap12_fault_is_rejected() {
    let raw = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
        <env:Body><env:Fault>
            <env:Code><env:Value>env:Sender</env:Value></env:Code>
            <env:Reason><env:Text xml:lang="pt">Mensagem invalida</env:Text></env:Reason>
        </env:Fault></env:Body>
    </env:Envelope>"#;
    assert_eq!(
        messages(&parse(raw).outcome),
        [ServiceMessage::new("env:Sender", "Mensagem invalida")]
    );
}

#[test]
fn escaped_output_document_is_unwrapped() {
    let raw = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
        <soap:Body>
            <ns2:RecepcionarLoteRpsResponse xmlns:ns2="http://nfse.abrasf.org.br">
                <outputXML>&lt;EnviarLoteRpsResposta xmlns="http://www.abrasf.org.br/nfse.xsd"&gt;&lt;Protocolo&gt;987654&lt;/Protocolo&gt;&lt;/EnviarLoteRpsResposta&gt;</outputXML>
            </ns2:RecepcionarLoteRpsResponse>
        </soap:Body>
    </soap:Envelope>"#;
    assert_eq!(
        parse(raw).outcome,
        Outcome::Accepted {
            protocol: "987654".into(),
            received_at: None,
        }
    );
}

#[test]
fn cdata_output_document_is_unwrapped() {
    let raw = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>
        <GerarNfseResponse><outputXML><![CDATA[<GerarNfseResposta><ListaMensagemRetorno><MensagemRetorno><Codigo>E1</Codigo><Mensagem>Falha</Mensagem></MensagemRetorno></ListaMensagemRetorno></GerarNfseResposta>]]></outputXML></GerarNfseResponse>
    </soap:Body></soap:Envelope>"#;
    assert_eq!(messages(&parse(raw).outcome)[0].code, "E1");
}

#[test]
fn message_text_starting_with_markup_is_not_unwrapped() {
    let raw = format!(
        r#"<GerarNfseResposta xmlns="{NS}"><ListaMensagemRetorno><MensagemRetorno>
            <Codigo>E2</Codigo><Mensagem>&lt;Cnpj&gt; obrigatorio</Mensagem>
        </MensagemRetorno></ListaMensagemRetorno></GerarNfseResposta>"#
    );
    assert_eq!(
        messages(&parse(&raw).outcome),
        [ServiceMessage::new("E2", "<Cnpj> obrigatorio")]
    );
}

fn authorized_with_description(description: &str) -> String {
    format!(
        r#"<ConsultarNfseRpsResposta xmlns="{NS}"><CompNfse><Nfse><InfNfse>
            <Numero>55</Numero><CodigoVerificacao>XYZ9</CodigoVerificacao>
            <DeclaracaoPrestacaoServico><InfDeclaracaoPrestacaoServico>
                <Servico><Discriminacao>{description}</Discriminacao></Servico>
            </InfDeclaracaoPrestacaoServico></DeclaracaoPrestacaoServico>
        </InfNfse></Nfse></CompNfse></ConsultarNfseRpsResposta>"#
    )
}

fn document_numbers(outcome: &Outcome) -> Vec<&str> {
    match outcome {
        Outcome::Authorized(docs) => docs.iter().map(|d| d.number.as_str()).collect(),
        other => panic!("expected authorization, got {other:?}"),
    }
}

#[test]
fn markup_in_description_is_not_unwrapped() {
    let raw = authorized_with_description("&lt;b&gt;Consultoria&lt;/b&gt;");
    assert_eq!(document_numbers(&parse(&raw).outcome), ["55"]);
}

#[test]
fn markup_in_description_inside_output_document() {
    let inner = authorized_with_description("&lt;b&gt;Consultoria&lt;/b&gt;");
    let raw = format!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>
            <ConsultarNfsePorRpsResponse><outputXML>{}</outputXML></ConsultarNfsePorRpsResponse>
        </soap:Body></soap:Envelope>"#,
        inner.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    );
    assert_eq!(document_numbers(&parse(&raw).outcome), ["55"]);
}

#[test]
fn raw_body_and_status_are_kept() {
    let body = format!(r#"<EnviarLoteRpsResposta xmlns="{NS}"><Protocolo>1</Protocolo></EnviarLoteRpsResposta>"#);
    let parsed = parse(&body);
    assert_eq!(parsed.raw, body);
    assert_eq!(parsed.http_status, None);

    let reply = RawResponse {
        status: 200,
        body: body.clone(),
        attempts: 1,
    };
    let response = WebserviceResponse::from_reply(&reply);
    assert_eq!(response.http_status, Some(200));
    assert_eq!(response.raw, body);
    assert_eq!(response.outcome, parsed.outcome);
}

#[test]
fn prefixes_do_not_matter() {
    let raw = r#"<ns3:EnviarLoteRpsResposta xmlns:ns3="http://www.abrasf.org.br/nfse.xsd">
        <ns3:Protocolo>   P-77   </ns3:Protocolo>
    </ns3:EnviarLoteRpsResposta>"#;
    assert!(matches!(
        parse(raw).outcome,
        Outcome::Accepted { ref protocol, .. } if protocol == "P-77"
    ));
}

// --- Nothing conclusive ---

#[test]
fn empty_or_broken_replies_are_indeterminate() {
    for raw in ["", "   \n", "<unclosed>", "not xml at all"] {
        assert_eq!(parse(raw).outcome, Outcome::Indeterminate, "{raw:?}");
    }
}

#[test]
fn pending_lot_is_indeterminate() {
    for code in ["1", "2"] {
        let raw = format!(
            r#"<ConsultarLoteRpsResposta xmlns="{NS}"><Situacao>{code}</Situacao></ConsultarLoteRpsResposta>"#
        );
        let response = parse(&raw);
        assert_eq!(response.outcome, Outcome::Indeterminate);
        assert!(response.lot_situation.is_some());
    }
}

#[test]
fn blank_protocol_is_ignored() {
    let raw = format!(r#"<EnviarLoteRpsResposta xmlns="{NS}"><Protocolo/></EnviarLoteRpsResposta>"#);
    assert_eq!(parse(&raw).outcome, Outcome::Indeterminate);
}

#[test]
fn verification_code_without_number_is_not_an_nfse() {
    let raw = format!(
        r#"<Resposta xmlns="{NS}"><InfNfse><CodigoVerificacao>X</CodigoVerificacao></InfNfse></Resposta>"#
    );
    assert_eq!(parse(&raw).outcome, Outcome::Indeterminate);
}
