//! Thin wrapper over the `quick-xml` writer for compact ABRASF documents.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::DocumentError;

/// Streams elements without indentation; text is escaped by `quick-xml`.
pub(crate) struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    pub(crate) fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    pub(crate) fn declaration(&mut self) -> Result<&mut Self, DocumentError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(self)
    }

    pub(crate) fn start(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
    ) -> Result<&mut Self, DocumentError> {
        let mut start = BytesStart::new(name);
        for &(key, value) in attributes {
            start.push_attribute((key, value));
        }
        self.writer.write_event(Event::Start(start))?;
        Ok(self)
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<&mut Self, DocumentError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(self)
    }

    /// `<name>value</name>` with `value` escaped.
    pub(crate) fn element(&mut self, name: &str, value: &str) -> Result<&mut Self, DocumentError> {
        self.start(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(value)))?;
        self.end(name)
    }

    /// Writes the element only when `value` is present and non-blank.
    pub(crate) fn optional(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<&mut Self, DocumentError> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => self.element(name, v),
            None => Ok(self),
        }
    }

    pub(crate) fn finish(self) -> Result<String, DocumentError> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| DocumentError::Encoding(e.to_string()))
    }
}
