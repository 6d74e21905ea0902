//! Structural XML index.
//!
//! Parses a document once with `quick-xml` and records every element with
//! its byte span in the source, its parent/children links, declared
//! namespaces, attributes and direct text. Lookups are by local name so
//! namespace prefixes and insignificant whitespace never change the result.
//!
//! The index borrows the source text; spans can be used to splice new
//! content into the original bytes without re-serialising the document.

use std::collections::BTreeMap;
use std::ops::Range;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Errors raised while indexing a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    #[error("Malformed XML at byte {position}: {message}")]
    Malformed { position: usize, message: String },

    #[error("Unclosed element <{0}> at end of input")]
    Unclosed(String),

    #[error("Document has no root element")]
    Empty,

    #[error("Document has more than one root element")]
    MultipleRoots,
}

/// One element of an indexed document.
#[derive(Debug, Clone)]
pub struct Element {
    /// Qualified name as written (`ds:Signature`).
    pub name: String,
    /// Name without prefix (`Signature`).
    pub local_name: String,
    /// Regular attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Namespace declarations made on this element. `None` is the default namespace.
    pub namespace_decls: Vec<(Option<String>, String)>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Byte range of the whole element, start tag through end tag.
    pub span: Range<usize>,
    /// Byte range between the start and end tags; `None` for `<x/>`.
    pub content: Option<Range<usize>>,
    text: String,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct text content (CDATA included), trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub const fn is_self_closing(&self) -> bool {
        self.content.is_none()
    }
}

/// An indexed XML document.
#[derive(Debug)]
pub struct XmlDocument<'a> {
    source: &'a str,
    elements: Vec<Element>,
}

impl<'a> XmlDocument<'a> {
    /// Index `source`. Fails on malformed markup, mismatched or unclosed tags.
    pub fn parse(source: &'a str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(false);

        let mut elements: Vec<Element> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut root_seen = false;

        loop {
            let event = reader.read_event().map_err(|e| XmlError::Malformed {
                position: to_usize(reader.error_position()),
                message: e.to_string(),
            })?;
            let after = to_usize(reader.buffer_position());

            match event {
                Event::Start(_) | Event::Empty(_) if stack.is_empty() && root_seen => {
                    return Err(XmlError::MultipleRoots);
                }
                Event::Start(e) => {
                    let start = tag_start(source, after);
                    let idx = push_element(&mut elements, &e, stack.last().copied(), start..after)
                        .map_err(|message| XmlError::Malformed {
                            position: start,
                            message,
                        })?;
                    elements[idx].content = Some(after..after);
                    stack.push(idx);
                    root_seen = true;
                }
                Event::Empty(e) => {
                    let start = tag_start(source, after);
                    push_element(&mut elements, &e, stack.last().copied(), start..after).map_err(
                        |message| XmlError::Malformed {
                            position: start,
                            message,
                        },
                    )?;
                    root_seen = true;
                }
                Event::End(_) => {
                    let start = tag_start(source, after);
                    let idx = stack.pop().ok_or_else(|| XmlError::Malformed {
                        position: start,
                        message: "end tag without matching start tag".into(),
                    })?;
                    let element = &mut elements[idx];
                    element.span.end = after;
                    if let Some(content) = element.content.as_mut() {
                        content.end = start;
                    }
                }
                Event::Text(t) => {
                    if let Some(&idx) = stack.last() {
                        let text = t.unescape().map_err(|e| XmlError::Malformed {
                            position: after,
                            message: e.to_string(),
                        })?;
                        elements[idx].text.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if let Some(&idx) = stack.last() {
                        elements[idx].text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(&open) = stack.last() {
            return Err(XmlError::Unclosed(elements[open].name.clone()));
        }
        if elements.is_empty() {
            return Err(XmlError::Empty);
        }

        Ok(Self { source, elements })
    }

    pub const fn source(&self) -> &'a str {
        self.source
    }

    /// Index of the document element.
    pub const fn root(&self) -> usize {
        0
    }

    pub fn element(&self, idx: usize) -> &Element {
        &self.elements[idx]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Source text of the element, tags included.
    pub fn outer_xml(&self, idx: usize) -> &'a str {
        &self.source[self.elements[idx].span.clone()]
    }

    /// Direct text of the element, trimmed.
    pub fn text(&self, idx: usize) -> &str {
        self.elements[idx].text()
    }

    /// All elements with the given local name, in document order.
    pub fn find_all(&self, local_name: &str) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.local_name == local_name)
            .map(|(i, _)| i)
            .collect()
    }

    /// First element with the given local name, in document order.
    pub fn find_first(&self, local_name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.local_name == local_name)
    }

    /// All elements carrying `attribute="value"`.
    pub fn find_by_attribute(&self, attribute: &str, value: &str) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.attribute(attribute) == Some(value))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        &self.elements[idx].children
    }

    /// First direct child with the given local name.
    pub fn child(&self, idx: usize, local_name: &str) -> Option<usize> {
        self.elements[idx]
            .children
            .iter()
            .copied()
            .find(|&c| self.elements[c].local_name == local_name)
    }

    /// Trimmed text of the first direct child with the given local name.
    pub fn child_text(&self, idx: usize, local_name: &str) -> Option<&str> {
        self.child(idx, local_name).map(|c| self.text(c))
    }

    /// First descendant (depth-first, document order) with the given local name.
    pub fn descendant(&self, idx: usize, local_name: &str) -> Option<usize> {
        let span = &self.elements[idx].span;
        self.elements
            .iter()
            .enumerate()
            .skip(idx + 1)
            .take_while(|(_, e)| e.span.start < span.end)
            .find(|(_, e)| e.local_name == local_name)
            .map(|(i, _)| i)
    }

    pub fn last_child(&self, idx: usize) -> Option<usize> {
        self.elements[idx].children.last().copied()
    }

    /// The element immediately following `idx` under the same parent.
    pub fn next_sibling(&self, idx: usize) -> Option<usize> {
        let parent = self.elements[idx].parent?;
        let siblings = &self.elements[parent].children;
        let pos = siblings.iter().position(|&s| s == idx)?;
        siblings.get(pos + 1).copied()
    }

    pub fn is_descendant_of(&self, idx: usize, ancestor: usize) -> bool {
        let mut current = self.elements[idx].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.elements[p].parent;
        }
        false
    }

    /// Whether any ancestor of `idx` has the given local name.
    pub fn has_ancestor(&self, idx: usize, local_name: &str) -> bool {
        let mut current = self.elements[idx].parent;
        while let Some(p) = current {
            if self.elements[p].local_name == local_name {
                return true;
            }
            current = self.elements[p].parent;
        }
        false
    }

    /// Namespace bindings declared by the ancestors of `idx` (not by `idx` itself).
    pub fn inherited_namespaces(&self, idx: usize) -> BTreeMap<Option<String>, String> {
        let mut chain = Vec::new();
        let mut current = self.elements[idx].parent;
        while let Some(p) = current {
            chain.push(p);
            current = self.elements[p].parent;
        }
        let mut scope = BTreeMap::new();
        for &p in chain.iter().rev() {
            for (prefix, uri) in &self.elements[p].namespace_decls {
                scope.insert(prefix.clone(), uri.clone());
            }
        }
        scope
    }

    /// All namespace bindings in scope at `idx`, its own declarations included.
    pub fn in_scope_namespaces(&self, idx: usize) -> BTreeMap<Option<String>, String> {
        let mut scope = self.inherited_namespaces(idx);
        for (prefix, uri) in &self.elements[idx].namespace_decls {
            scope.insert(prefix.clone(), uri.clone());
        }
        scope
    }
}

fn to_usize<T: TryInto<usize>>(position: T) -> usize {
    position.try_into().unwrap_or(usize::MAX)
}

/// Markup cannot contain `<` outside of its own opening bracket, so the last
/// `<` before the end of a tag is where the tag begins.
fn tag_start(source: &str, tag_end: usize) -> usize {
    source[..tag_end].rfind('<').unwrap_or(0)
}

fn push_element(
    elements: &mut Vec<Element>,
    start: &BytesStart<'_>,
    parent: Option<usize>,
    span: Range<usize>,
) -> Result<usize, String> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();
    let local_name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();

    let mut attributes = Vec::new();
    let mut namespace_decls = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| e.to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        if key == "xmlns" {
            namespace_decls.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_decls.push((Some(prefix.to_string()), value));
        } else {
            attributes.push((key.to_string(), value));
        }
    }

    let idx = elements.len();
    elements.push(Element {
        name,
        local_name,
        attributes,
        namespace_decls,
        parent,
        children: Vec::new(),
        span,
        content: None,
        text: String::new(),
    });
    if let Some(p) = parent {
        elements[p].children.push(idx);
    }
    Ok(idx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ns2:Resposta xmlns:ns2="http://www.abrasf.org.br/nfse.xsd" xmlns:x="urn:x">
    <ns2:Lista>
        <ns2:Item Id="a1"><ns2:Codigo>E1</ns2:Codigo><ns2:Mensagem>Falha &amp; erro</ns2:Mensagem></ns2:Item>
        <ns2:Item Id="a2"/>
    </ns2:Lista>
    <ns2:Nota><![CDATA[texto <cru>]]></ns2:Nota>
</ns2:Resposta>"#;

    #[test]
    fn indexes_elements_by_local_name() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.element(doc.root()).local_name, "Resposta");
        assert_eq!(doc.find_all("Item").len(), 2);
        let codigo = doc.find_first("Codigo").unwrap();
        assert_eq!(doc.text(codigo), "E1");
        assert_eq!(doc.element(codigo).name, "ns2:Codigo");
    }

    #[test]
    fn unescapes_text_and_reads_cdata() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        let msg = doc.find_first("Mensagem").unwrap();
        assert_eq!(doc.text(msg), "Falha & erro");
        let nota = doc.find_first("Nota").unwrap();
        assert_eq!(doc.text(nota), "texto <cru>");
    }

    #[test]
    fn spans_cover_source_text() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        let items = doc.find_by_attribute("Id", "a1");
        assert_eq!(items.len(), 1);
        let outer = doc.outer_xml(items[0]);
        assert!(outer.starts_with(r#"<ns2:Item Id="a1">"#));
        assert!(outer.ends_with("</ns2:Item>"));

        let empty = doc.find_by_attribute("Id", "a2")[0];
        assert_eq!(doc.outer_xml(empty), r#"<ns2:Item Id="a2"/>"#);
        assert!(doc.element(empty).is_self_closing());

        let content = doc.element(items[0]).content.clone().unwrap();
        assert!(SAMPLE[content].starts_with("<ns2:Codigo>"));
    }

    #[test]
    fn sibling_and_child_navigation() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        let first = doc.find_by_attribute("Id", "a1")[0];
        let second = doc.find_by_attribute("Id", "a2")[0];
        assert_eq!(doc.next_sibling(first), Some(second));
        assert_eq!(doc.next_sibling(second), None);
        let lista = doc.find_first("Lista").unwrap();
        assert_eq!(doc.last_child(lista), Some(second));
        assert!(doc.is_descendant_of(first, lista));
        assert!(doc.has_ancestor(first, "Resposta"));
        assert_eq!(doc.child_text(first, "Codigo"), Some("E1"));
        assert_eq!(doc.descendant(doc.root(), "Mensagem"), doc.find_first("Mensagem"));
    }

    #[test]
    fn namespace_scope_is_inherited() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        let item = doc.find_first("Item").unwrap();
        let scope = doc.in_scope_namespaces(item);
        assert_eq!(
            scope.get(&Some("ns2".to_string())).map(String::as_str),
            Some("http://www.abrasf.org.br/nfse.xsd")
        );
        assert!(scope.contains_key(&Some("x".to_string())));
        assert!(doc.inherited_namespaces(doc.root()).is_empty());
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(matches!(
            XmlDocument::parse("<a><b></a>"),
            Err(XmlError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unclosed_root() {
        assert!(XmlDocument::parse("<a><b/>").is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(XmlDocument::parse("   ").unwrap_err(), XmlError::Empty);
    }
}
