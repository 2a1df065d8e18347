//! Streaming XML plumbing shared by the emitters, merger, pruner and patcher.

mod reader;

pub use reader::{CatalogReader, Chunk, PackageRecord};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

use crate::error::Result;

/// Whitespace-only text between records.
pub fn is_blank(event: &Event<'_>) -> bool {
    matches!(event, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace))
}

/// Event-level XML writer; nothing is buffered beyond the underlying sink.
pub struct XmlWriter<W: Write> {
    inner: Writer<W>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            inner: Writer::new(sink),
        }
    }

    /// `<?xml version="1.0" encoding="UTF-8"?>`
    pub fn declaration(&mut self) -> Result<()> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        elem.extend_attributes(attrs.iter().copied());
        self.event(Event::Start(elem))
    }

    /// Self-closing element.
    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        elem.extend_attributes(attrs.iter().copied());
        self.event(Event::Empty(elem))
    }

    pub fn text(&mut self, text: &str) -> Result<()> {
        self.event(Event::Text(BytesText::new(text)))
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// `<name attrs>text</name>`
    pub fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.text(text)?;
        self.end(name)
    }

    pub fn newline(&mut self) -> Result<()> {
        self.event(Event::Text(BytesText::from_escaped("\n")))
    }

    /// Write an event verbatim, used for pass-through copies.
    pub fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.inner.write_event(event)?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_escaped_elements() {
        let mut out = XmlWriter::new(Vec::new());
        out.start("a", &[("k", "v\"")]).unwrap();
        out.element("b", &[], "x < y & z").unwrap();
        out.empty("c", &[("n", "1")]).unwrap();
        out.end("a").unwrap();
        let xml = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(
            xml,
            r#"<a k="v&quot;"><b>x &lt; y &amp; z</b><c n="1"/></a>"#
        );
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(&Event::Text(BytesText::from_escaped("\n  \t"))));
        assert!(!is_blank(&Event::Text(BytesText::from_escaped(" x "))));
        assert!(!is_blank(&Event::End(BytesEnd::new("a"))));
    }
}
