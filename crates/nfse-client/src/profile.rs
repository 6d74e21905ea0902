//! Which elements each operation signs, and where the signature goes.
//!
//! The placement is fixed by the municipal webservice and cannot be derived
//! from the document. ABRASF 2.04 defaults:
//!
//! | Operation             | Signed elements, in order                               | Placement |
//! |-----------------------|---------------------------------------------------------|-----------|
//! | `RecepcionarLoteRps`  | every `InfDeclaracaoPrestacaoServico`, then `LoteRps`   | sibling   |
//! | `GerarNfse`           | `InfDeclaracaoPrestacaoServico`                         | sibling   |
//! | `ConsultarLoteRps`    | none                                                    |           |
//! | `ConsultarNfsePorRps` | none                                                    |           |
//!
//! Inner blocks are signed before the enclosing lot so the lot signature
//! covers them.

use std::collections::HashMap;

use nfse_core::model::Operation;
use nfse_crypto::{CertificateBundle, SignaturePlacement, SigningError, sign_all};
use tracing::debug;

pub const DECLARATION_ELEMENT: &str = "InfDeclaracaoPrestacaoServico";
pub const LOT_ELEMENT: &str = "LoteRps";

/// One signature pass: every element named `element` is signed by its `Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStep {
    pub element: String,
    pub placement: SignaturePlacement,
}

impl SignatureStep {
    pub fn new(element: impl Into<String>, placement: SignaturePlacement) -> Self {
        Self {
            element: element.into(),
            placement,
        }
    }
}

/// Ordered signature steps per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureProfile {
    steps: HashMap<Operation, Vec<SignatureStep>>,
}

impl SignatureProfile {
    /// The ABRASF 2.04 table above.
    pub fn abrasf_v204() -> Self {
        let mut steps = HashMap::new();
        steps.insert(
            Operation::BatchSubmission,
            vec![
                SignatureStep::new(DECLARATION_ELEMENT, SignaturePlacement::Sibling),
                SignatureStep::new(LOT_ELEMENT, SignaturePlacement::Sibling),
            ],
        );
        steps.insert(
            Operation::SingleIssuance,
            vec![SignatureStep::new(
                DECLARATION_ELEMENT,
                SignaturePlacement::Sibling,
            )],
        );
        Self { steps }
    }

    pub fn steps(&self, operation: Operation) -> &[SignatureStep] {
        self.steps.get(&operation).map_or(&[], Vec::as_slice)
    }

    /// Override the placement for `element` within `operation`, adding the
    /// step at the end when the operation does not sign it yet.
    #[must_use]
    pub fn with_placement(
        mut self,
        operation: Operation,
        element: &str,
        placement: SignaturePlacement,
    ) -> Self {
        let steps = self.steps.entry(operation).or_default();
        match steps.iter_mut().find(|s| s.element == element) {
            Some(step) => step.placement = placement,
            None => steps.push(SignatureStep::new(element, placement)),
        }
        self
    }

    /// Send `operation` unsigned.
    #[must_use]
    pub fn without_signatures(mut self, operation: Operation) -> Self {
        self.steps.remove(&operation);
        self
    }

    /// Apply every step for `operation` to `xml`, in order.
    pub fn apply(
        &self,
        operation: Operation,
        xml: &str,
        bundle: &CertificateBundle,
    ) -> Result<String, SigningError> {
        let mut signed = xml.to_owned();
        for step in self.steps(operation) {
            signed = sign_all(&signed, &step.element, bundle, step.placement)?;
            debug!(
                operation = %operation,
                element = %step.element,
                placement = ?step.placement,
                "Applied signature step"
            );
        }
        Ok(signed)
    }
}

impl Default for SignatureProfile {
    fn default() -> Self {
        Self::abrasf_v204()
    }
}
