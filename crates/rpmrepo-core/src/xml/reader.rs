use quick_xml::Reader;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use rpmrepo_schema::CatalogKind;
use std::io::BufRead;

use crate::error::{MetadataError, Result};

const PACKAGE: &[u8] = b"package";

/// One `<package>` subtree, buffered as owned events.
///
/// Only a single record is ever held in memory at a time.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub pkgid: String,
    pub events: Vec<Event<'static>>,
}

/// Coarse pieces of a catalog document, in document order.
#[derive(Debug)]
pub enum Chunk {
    /// Declaration, comments and whitespace before the root element.
    Prologue(Event<'static>),
    /// Root start tag; `self_closing` for `<root/>`, which is followed by a synthetic [`Chunk::RootEnd`].
    Root {
        start: BytesStart<'static>,
        self_closing: bool,
    },
    /// Whitespace, comments or foreign elements between records.
    Inner(Event<'static>),
    Package(PackageRecord),
    RootEnd(BytesEnd<'static>),
    /// Anything after the root element.
    Epilogue(Event<'static>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Prologue,
    InRoot,
    Done,
}

/// Pull-based reader splitting a catalog into [`Chunk`]s.
pub struct CatalogReader<R: BufRead> {
    reader: Reader<R>,
    kind: CatalogKind,
    buf: Vec<u8>,
    state: State,
    depth: usize,
    pending_end: Option<BytesEnd<'static>>,
}

impl<R: BufRead> CatalogReader<R> {
    pub fn new(input: R, kind: CatalogKind) -> Self {
        Self {
            reader: Reader::from_reader(input),
            kind,
            buf: Vec::new(),
            state: State::Prologue,
            depth: 0,
            pending_end: None,
        }
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    fn read(&mut self) -> Result<Event<'static>> {
        self.buf.clear();
        let event = self.reader.read_event_into(&mut self.buf)?;
        Ok(event.into_owned())
    }

    /// Next chunk, or `None` once the document is exhausted.
    ///
    /// # Errors
    ///
    /// Fails on XML syntax errors, a wrong or missing root element, a
    /// document truncated inside the root, or a record without identity.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if let Some(end) = self.pending_end.take() {
            self.state = State::Done;
            return Ok(Some(Chunk::RootEnd(end)));
        }
        loop {
            let event = self.read()?;
            match self.state {
                State::Prologue => match event {
                    Event::Eof => {
                        return Err(MetadataError::malformed(self.kind, "no root element"));
                    }
                    Event::Start(start) => {
                        self.check_root(&start)?;
                        self.state = State::InRoot;
                        return Ok(Some(Chunk::Root {
                            start,
                            self_closing: false,
                        }));
                    }
                    Event::Empty(start) => {
                        self.check_root(&start)?;
                        self.pending_end = Some(start.to_end().into_owned());
                        return Ok(Some(Chunk::Root {
                            start,
                            self_closing: true,
                        }));
                    }
                    other => return Ok(Some(Chunk::Prologue(other))),
                },
                State::InRoot => match event {
                    Event::Eof => {
                        return Err(MetadataError::malformed(
                            self.kind,
                            "document ends inside the root element",
                        ));
                    }
                    Event::Start(start) if self.depth == 0 && start.name().as_ref() == PACKAGE => {
                        let record = self.read_package(start)?;
                        return Ok(Some(Chunk::Package(record)));
                    }
                    Event::Empty(start) if self.depth == 0 && start.name().as_ref() == PACKAGE => {
                        let pkgid = self.identity_attr(&start)?;
                        let pkgid = self.require_identity(pkgid)?;
                        return Ok(Some(Chunk::Package(PackageRecord {
                            pkgid,
                            events: vec![Event::Empty(start)],
                        })));
                    }
                    Event::End(end) if self.depth == 0 => {
                        self.state = State::Done;
                        return Ok(Some(Chunk::RootEnd(end)));
                    }
                    Event::Start(start) => {
                        self.depth += 1;
                        return Ok(Some(Chunk::Inner(Event::Start(start))));
                    }
                    Event::End(end) => {
                        self.depth -= 1;
                        return Ok(Some(Chunk::Inner(Event::End(end))));
                    }
                    other => return Ok(Some(Chunk::Inner(other))),
                },
                State::Done => match event {
                    Event::Eof => return Ok(None),
                    other => return Ok(Some(Chunk::Epilogue(other))),
                },
            }
        }
    }

    fn check_root(&self, start: &BytesStart<'_>) -> Result<()> {
        let local = start.local_name();
        if local.as_ref() == self.kind.root_tag().as_bytes() {
            Ok(())
        } else {
            Err(MetadataError::malformed(
                self.kind,
                format!(
                    "expected root <{}>, found <{}>",
                    self.kind.root_tag(),
                    String::from_utf8_lossy(local.as_ref())
                ),
            ))
        }
    }

    fn identity_attr(&self, start: &BytesStart<'_>) -> Result<Option<String>> {
        if self.kind == CatalogKind::Primary {
            return Ok(None);
        }
        for attr in start.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == b"pkgid" {
                return Ok(Some(attr.unescape_value()?.into_owned()));
            }
        }
        Ok(None)
    }

    fn require_identity(&self, pkgid: Option<String>) -> Result<String> {
        match pkgid {
            Some(id) if !id.trim().is_empty() => Ok(id.trim().to_ascii_lowercase()),
            _ => Err(MetadataError::malformed(self.kind, "package record without identity")),
        }
    }

    /// Buffer a `<package>` subtree whose start tag has just been read.
    fn read_package(&mut self, start: BytesStart<'static>) -> Result<PackageRecord> {
        let mut pkgid = self.identity_attr(&start)?;
        let mut events = vec![Event::Start(start)];
        let mut depth = 0usize;
        let mut in_checksum = false;
        let mut checksum = String::new();
        loop {
            let event = self.read()?;
            let closes_record = match &event {
                Event::Eof => {
                    return Err(MetadataError::malformed(
                        self.kind,
                        "document ends inside a package record",
                    ));
                }
                Event::Start(e) => {
                    depth += 1;
                    if depth == 1 && e.name().as_ref() == b"checksum" {
                        in_checksum = true;
                    }
                    false
                }
                Event::Text(t) if in_checksum => {
                    checksum.push_str(&t.unescape()?);
                    false
                }
                Event::End(_) if depth == 0 => true,
                Event::End(_) => {
                    if depth == 1 {
                        in_checksum = false;
                    }
                    depth -= 1;
                    false
                }
                _ => false,
            };
            events.push(event);
            if closes_record {
                break;
            }
        }
        if self.kind == CatalogKind::Primary && !checksum.is_empty() {
            pkgid = Some(checksum);
        }
        let pkgid = self.require_identity(pkgid)?;
        Ok(PackageRecord { pkgid, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(xml: &str, kind: CatalogKind) -> Result<Vec<Chunk>> {
        let mut reader = CatalogReader::new(xml.as_bytes(), kind);
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk()? {
            out.push(chunk);
        }
        Ok(out)
    }

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks
            .iter()
            .filter_map(|c| match c {
                Chunk::Package(p) => Some(p.pkgid.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn primary_identity_from_checksum_text() {
        let xml = r#"<?xml version="1.0"?>
<metadata packages="1">
<package type="rpm"><name>a</name><checksum type="sha256" pkgid="YES">ABC1</checksum><format><file>/x</file></format></package>
</metadata>"#;
        let all = chunks(xml, CatalogKind::Primary).unwrap();
        assert_eq!(ids(&all), vec!["abc1"]);
        assert!(matches!(all.last(), Some(Chunk::RootEnd(_))));
    }

    #[test]
    fn other_identity_from_attribute() {
        let xml = r#"<otherdata packages="2"><package pkgid="a1" name="a"><version/></package><package pkgid="b2" name="b"/></otherdata>"#;
        let all = chunks(xml, CatalogKind::Other).unwrap();
        assert_eq!(ids(&all), vec!["a1", "b2"]);
    }

    #[test]
    fn self_closing_root_yields_end() {
        let all = chunks(r#"<filelists packages="0"/>"#, CatalogKind::Filelists).unwrap();
        assert!(matches!(all[0], Chunk::Root { self_closing: true, .. }));
        assert!(matches!(all[1], Chunk::RootEnd(_)));
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn rejects_missing_root_and_truncation() {
        assert!(chunks("<?xml version=\"1.0\"?>", CatalogKind::Other).is_err());
        assert!(chunks("<otherdata><package pkgid=\"a\">", CatalogKind::Other).is_err());
        assert!(chunks("<metadata>", CatalogKind::Primary).is_err());
    }

    #[test]
    fn rejects_wrong_root_and_missing_identity() {
        assert!(chunks("<metadata/>", CatalogKind::Other).is_err());
        let xml = r#"<otherdata><package name="a"></package></otherdata>"#;
        assert!(matches!(
            chunks(xml, CatalogKind::Other),
            Err(MetadataError::Malformed { .. })
        ));
    }
}
