//! Canonical XML 1.0 (without comments) of document subsets.

use std::collections::BTreeMap;
use std::ops::Range;

use nfse_core::xml::XmlDocument;
use quick_xml::escape::escape;
use xml_c14n::{CanonicalizationMode, CanonicalizationOptions, canonicalize_xml};

use crate::error::SigningError;

/// Canonicalize a standalone document.
pub fn canonicalize(xml: &str) -> Result<String, SigningError> {
    let options = CanonicalizationOptions {
        mode: CanonicalizationMode::Canonical1_0,
        keep_comments: false,
        inclusive_ns_prefixes: vec![],
    };
    canonicalize_xml(xml, options).map_err(|e| SigningError::Canonicalization(e.to_string()))
}

/// Canonical form of element `idx` as a document subset.
///
/// Inclusive C14N renders every namespace in scope on the apex element, so the
/// bindings inherited from ancestors are declared on the extracted root before
/// canonicalizing. Bytes in `exclude` (an enveloped signature) are dropped.
pub fn canonicalize_element(
    doc: &XmlDocument<'_>,
    idx: usize,
    exclude: Option<Range<usize>>,
) -> Result<String, SigningError> {
    let span = doc.element(idx).span.clone();
    let mut fragment = doc.outer_xml(idx).to_owned();
    if let Some(range) = exclude {
        if range.start >= span.start && range.end <= span.end {
            fragment.replace_range(range.start - span.start..range.end - span.start, "");
        }
    }

    let declared: Vec<&Option<String>> = doc
        .element(idx)
        .namespace_decls
        .iter()
        .map(|(prefix, _)| prefix)
        .collect();
    let mut scope = doc.inherited_namespaces(idx);
    scope.retain(|prefix, _| !declared.contains(&prefix));

    canonicalize_fragment(&fragment, &scope)
}

/// Canonicalize `fragment` as if its root were in the namespace `scope`.
///
/// Bindings in `scope` are injected into the root start tag, so callers must
/// leave out prefixes the root already declares.
pub fn canonicalize_fragment(
    fragment: &str,
    scope: &BTreeMap<Option<String>, String>,
) -> Result<String, SigningError> {
    if scope.is_empty() {
        return canonicalize(fragment);
    }
    let name_end = root_name_end(fragment).ok_or_else(|| {
        SigningError::Canonicalization("fragment does not start with an element".into())
    })?;

    let mut declarations = String::new();
    for (prefix, uri) in scope {
        // An empty default namespace is the C14N default and is never rendered.
        if prefix.is_none() && uri.is_empty() {
            continue;
        }
        match prefix {
            Some(p) => declarations.push_str(&format!(" xmlns:{p}=\"{}\"", escape(uri.as_str()))),
            None => declarations.push_str(&format!(" xmlns=\"{}\"", escape(uri.as_str()))),
        }
    }

    let mut injected = String::with_capacity(fragment.len() + declarations.len());
    injected.push_str(&fragment[..name_end]);
    injected.push_str(&declarations);
    injected.push_str(&fragment[name_end..]);
    canonicalize(&injected)
}

/// Byte offset just past the root element name.
fn root_name_end(fragment: &str) -> Option<usize> {
    let open = fragment.find('<')?;
    let rest = &fragment[open + 1..];
    let len = rest.find(|c: char| c.is_whitespace() || c == '/' || c == '>')?;
    (len > 0).then_some(open + 1 + len)
}
