//! Streaming append of new records into an existing catalog.
//!
//! Existing `<package>` subtrees are copied through in order; new records are
//! emitted just before the root end tag. The document count attribute is left
//! as found and fixed afterwards by [`crate::patch`].

use quick_xml::events::{BytesEnd, BytesStart, Event};
use rpmrepo_schema::{COUNT_ATTR, CatalogKind, PackageDescriptor};
use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::emit::RecordEmitter;
use crate::error::Result;
use crate::xml::{CatalogReader, Chunk, XmlWriter, is_blank};

/// Outcome of the authoritative primary merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    count: u64,
    accepted: HashSet<String>,
    duplicates: u64,
}

impl MergeResult {
    /// Final record count every catalog must end up with.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Identities of the new records the primary merge emitted.
    pub fn accepted(&self) -> &HashSet<String> {
        &self.accepted
    }

    pub fn is_accepted(&self, pkgid: &str) -> bool {
        self.accepted.contains(pkgid)
    }

    /// New descriptors skipped because their identity was already present.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

/// Receives record identities while copying, then appends the new records.
trait Tail<W: Write> {
    fn seen(&mut self, _pkgid: &str) {}

    /// Emit new records; returns how many were written.
    fn finish(&mut self, out: &mut XmlWriter<W>) -> Result<u64>;
}

struct PrimaryTail<'a, P> {
    packages: &'a [P],
    emitter: &'a RecordEmitter,
    existing: HashSet<String>,
    accepted: HashSet<String>,
    duplicates: u64,
}

impl<W: Write, P: PackageDescriptor> Tail<W> for PrimaryTail<'_, P> {
    fn seen(&mut self, pkgid: &str) {
        self.existing.insert(pkgid.to_owned());
    }

    fn finish(&mut self, out: &mut XmlWriter<W>) -> Result<u64> {
        let mut added = 0u64;
        for pkg in self.packages {
            let id = pkg.checksum().hex();
            if self.existing.contains(id) || !self.accepted.insert(id.to_owned()) {
                tracing::debug!(pkgid = id, location = pkg.location(), "skipping duplicate");
                self.duplicates += 1;
                continue;
            }
            out.newline()?;
            self.emitter.emit(out, pkg)?;
            added += 1;
        }
        Ok(added)
    }
}

struct DependentTail<'a, P> {
    packages: &'a [P],
    emitter: &'a RecordEmitter,
    accepted: &'a HashSet<String>,
}

impl<W: Write, P: PackageDescriptor> Tail<W> for DependentTail<'_, P> {
    fn finish(&mut self, out: &mut XmlWriter<W>) -> Result<u64> {
        let mut emitted = HashSet::new();
        for pkg in self.packages {
            let id = pkg.checksum().hex();
            if self.accepted.contains(id) && emitted.insert(id) {
                out.newline()?;
                self.emitter.emit(out, pkg)?;
            }
        }
        Ok(emitted.len() as u64)
    }
}

/// Merge `packages` into the primary catalog, skipping identities already present.
///
/// Duplicates within `packages` are skipped too; the first occurrence wins.
///
/// # Errors
///
/// Fails on read/write errors or a malformed existing document.
pub fn merge_primary<R, W, P>(
    input: Option<R>,
    packages: &[P],
    emitter: &RecordEmitter,
    output: W,
) -> Result<MergeResult>
where
    R: BufRead,
    W: Write,
    P: PackageDescriptor,
{
    let mut tail = PrimaryTail {
        packages,
        emitter,
        existing: HashSet::new(),
        accepted: HashSet::new(),
        duplicates: 0,
    };
    let (kept, added) = splice(input, emitter.kind(), output, &mut tail)?;
    Ok(MergeResult {
        count: kept + added,
        accepted: tail.accepted,
        duplicates: tail.duplicates,
    })
}

/// Merge into a dependent catalog, emitting exactly the identities `accepted` holds.
///
/// Each accepted identity is emitted once, in `packages` order. Returns the
/// final record count.
///
/// # Errors
///
/// Fails on read/write errors or a malformed existing document.
pub fn merge_dependent<R, W, P>(
    input: Option<R>,
    packages: &[P],
    emitter: &RecordEmitter,
    accepted: &HashSet<String>,
    output: W,
) -> Result<u64>
where
    R: BufRead,
    W: Write,
    P: PackageDescriptor,
{
    let mut tail = DependentTail {
        packages,
        emitter,
        accepted,
    };
    let (kept, added) = splice(input, emitter.kind(), output, &mut tail)?;
    Ok(kept + added)
}

/// Copy `input` to `output`, letting `tail` append right before the root end tag.
///
/// Returns the number of copied records and the number appended. A missing
/// input is treated as an empty catalog with a fresh root element.
fn splice<R, W, T>(input: Option<R>, kind: CatalogKind, output: W, tail: &mut T) -> Result<(u64, u64)>
where
    R: BufRead,
    W: Write,
    T: Tail<W>,
{
    let mut out = XmlWriter::new(output);
    let Some(input) = input else {
        out.declaration()?;
        out.newline()?;
        let mut root = BytesStart::new(kind.root_tag());
        root.extend_attributes(kind.namespaces().iter().copied());
        root.push_attribute((COUNT_ATTR, "0"));
        out.event(Event::Start(root))?;
        let added = tail.finish(&mut out)?;
        out.newline()?;
        out.event(Event::End(BytesEnd::new(kind.root_tag())))?;
        out.newline()?;
        out.get_mut().flush()?;
        return Ok((0, added));
    };

    let mut reader = CatalogReader::new(input, kind);
    let mut kept = 0u64;
    let mut added = 0u64;
    let mut blank: Option<Event<'static>> = None;
    while let Some(chunk) = reader.next_chunk()? {
        if !matches!(chunk, Chunk::RootEnd(_)) {
            if let Some(ws) = blank.take() {
                out.event(ws)?;
            }
        }
        match chunk {
            Chunk::Prologue(event) | Chunk::Epilogue(event) => out.event(event)?,
            Chunk::Root { start, .. } => out.event(Event::Start(start))?,
            Chunk::Inner(event) if is_blank(&event) => blank = Some(event),
            Chunk::Inner(event) => out.event(event)?,
            Chunk::Package(record) => {
                tail.seen(&record.pkgid);
                for event in record.events {
                    out.event(event)?;
                }
                kept += 1;
            }
            Chunk::RootEnd(end) => {
                added = tail.finish(&mut out)?;
                match blank.take() {
                    Some(ws) => out.event(ws)?,
                    None if added > 0 => out.newline()?,
                    None => {}
                }
                out.event(Event::End(end))?;
            }
        }
    }
    out.get_mut().flush()?;
    Ok((kept, added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::PathFilter;
    use crate::testing::{descriptor, record_count, sha};

    fn primary(input: Option<&str>, pkgs: &[crate::rpm::RpmPackage]) -> (String, MergeResult) {
        let mut out = Vec::new();
        let result = merge_primary(
            input.map(str::as_bytes),
            pkgs,
            &RecordEmitter::Primary,
            &mut out,
        )
        .unwrap();
        (String::from_utf8(out).unwrap(), result)
    }

    #[test]
    fn fresh_catalog_gets_root_and_namespaces() {
        let (xml, result) = primary(None, &[descriptor("a", &sha('a'))]);
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="0">"#));
        assert!(xml.trim_end().ends_with("</package>\n</metadata>"));
        assert_eq!(result.count(), 1);
        assert!(result.is_accepted(&sha('a')));
    }

    #[test]
    fn same_package_twice_in_one_batch_is_emitted_once() {
        let p = descriptor("p", &sha('1'));
        let (xml, result) = primary(None, &[p.clone(), p]);
        assert_eq!(result.count(), 1);
        assert_eq!(result.duplicates(), 1);
        assert_eq!(xml.matches(&sha('1')).count(), 1);
    }

    #[test]
    fn existing_records_kept_in_order_and_not_duplicated() {
        let existing = format!(
            "<?xml version=\"1.0\"?>\n<metadata packages=\"2\">\n<package type=\"rpm\"><checksum>{}</checksum></package>\n<package type=\"rpm\"><checksum>{}</checksum></package>\n</metadata>\n",
            sha('a'),
            sha('b')
        );
        let (xml, result) = primary(
            Some(&existing),
            &[descriptor("b", &sha('b')), descriptor("c", &sha('c'))],
        );
        assert_eq!(result.count(), 3);
        assert_eq!(result.duplicates(), 1);
        assert_eq!(result.accepted().len(), 1);
        let (a, b, c) = (
            xml.find(&sha('a')).unwrap(),
            xml.find(&sha('b')).unwrap(),
            xml.find(&sha('c')).unwrap(),
        );
        assert!(a < b && b < c);
        assert_eq!(record_count(&xml), 3);
        assert!(xml.contains("packages=\"2\""));
        assert!(xml.ends_with("</package>\n</metadata>\n"));
    }

    #[test]
    fn self_closing_root_is_expanded() {
        let (xml, result) = primary(Some(r#"<metadata packages="0"/>"#), &[descriptor("a", &sha('a'))]);
        assert_eq!(result.count(), 1);
        assert!(xml.starts_with(r#"<metadata packages="0">"#));
        assert!(xml.ends_with("</package>\n</metadata>"));
    }

    #[test]
    fn dependent_merge_follows_accepted_set() {
        let existing = format!(
            r#"<otherdata packages="1"><package pkgid="{}" name="a"/></otherdata>"#,
            sha('a')
        );
        let accepted: HashSet<String> = [sha('c')].into_iter().collect();
        let pkgs = [
            descriptor("b", &sha('b')),
            descriptor("c", &sha('c')),
            descriptor("c", &sha('c')),
        ];
        let mut out = Vec::new();
        let count = merge_dependent(
            Some(existing.as_bytes()),
            &pkgs,
            &RecordEmitter::Other,
            &accepted,
            &mut out,
        )
        .unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert_eq!(count, 2);
        assert!(!xml.contains(&sha('b')));
        assert_eq!(xml.matches(&sha('c')).count(), 1);
    }

    #[test]
    fn filelists_fresh_root() {
        let accepted: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        let count = merge_dependent(
            None::<&[u8]>,
            &[descriptor("a", &sha('a'))],
            &RecordEmitter::Filelists(PathFilter::none()),
            &accepted,
            &mut out,
        )
        .unwrap();
        assert_eq!(count, 0);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<filelists xmlns=\"http://linux.duke.edu/metadata/filelists\" packages=\"0\">"));
        assert_eq!(record_count(&xml), 0);
    }

    #[test]
    fn malformed_existing_fails() {
        let mut out = Vec::new();
        let err = merge_primary(
            Some("<metadata><package>".as_bytes()),
            &[descriptor("a", &sha('a'))],
            &RecordEmitter::Primary,
            &mut out,
        );
        assert!(err.is_err());
    }
}
