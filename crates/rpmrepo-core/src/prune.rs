use quick_xml::events::Event;
use rpmrepo_schema::CatalogKind;
use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::error::Result;
use crate::xml::{CatalogReader, Chunk, XmlWriter, is_blank};

/// Survivor bookkeeping of one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneResult {
    pub count: u64,
    pub removed: u64,
}

/// Copy `input` to `output`, dropping records whose identity is in `removal`.
///
/// Identities in `removal` that the document does not hold are ignored. The
/// whitespace run in front of a dropped record goes with it.
///
/// # Errors
///
/// Fails on read/write errors or a malformed document.
pub fn prune<R: BufRead, W: Write>(
    input: R,
    kind: CatalogKind,
    removal: &HashSet<String>,
    output: W,
) -> Result<PruneResult> {
    let mut reader = CatalogReader::new(input, kind);
    let mut out = XmlWriter::new(output);
    let mut result = PruneResult::default();
    let mut blank = None;
    while let Some(chunk) = reader.next_chunk()? {
        match chunk {
            Chunk::Package(record) if removal.contains(&record.pkgid) => {
                tracing::debug!(%kind, pkgid = %record.pkgid, "dropping record");
                blank = None;
                result.removed += 1;
                continue;
            }
            Chunk::Inner(event) if is_blank(&event) => {
                if let Some(ws) = blank.replace(event) {
                    out.event(ws)?;
                }
                continue;
            }
            _ => {}
        }
        if let Some(ws) = blank.take() {
            out.event(ws)?;
        }
        match chunk {
            Chunk::Prologue(event) | Chunk::Inner(event) | Chunk::Epilogue(event) => {
                out.event(event)?;
            }
            Chunk::Root { start, self_closing } => {
                if self_closing {
                    out.event(Event::Empty(start))?;
                    // skip the synthetic end tag
                    reader.next_chunk()?;
                } else {
                    out.event(Event::Start(start))?;
                }
            }
            Chunk::Package(record) => {
                for event in record.events {
                    out.event(event)?;
                }
                result.count += 1;
            }
            Chunk::RootEnd(end) => out.event(Event::End(end))?,
        }
    }
    out.get_mut().flush()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sha;

    fn other(ids: &[char]) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<otherdata packages=\"3\">");
        for id in ids {
            xml.push_str(&format!("\n<package pkgid=\"{}\" name=\"{id}\"><version/></package>", sha(*id)));
        }
        xml.push_str("\n</otherdata>\n");
        xml
    }

    fn run(input: &str, removal: &[char]) -> (String, PruneResult) {
        let removal: HashSet<String> = removal.iter().map(|c| sha(*c)).collect();
        let mut out = Vec::new();
        let result = prune(input.as_bytes(), CatalogKind::Other, &removal, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), result)
    }

    #[test]
    fn removes_matching_and_keeps_order() {
        let (xml, result) = run(&other(&['a', 'b', 'c']), &['a', 'b']);
        assert_eq!(result, PruneResult { count: 1, removed: 2 });
        assert_eq!(xml, other(&['c']));
    }

    #[test]
    fn unknown_identity_is_a_no_op() {
        let input = other(&['a']);
        let (xml, result) = run(&input, &['d']);
        assert_eq!(result.count, 1);
        assert_eq!(result.removed, 0);
        assert_eq!(xml, input);
    }

    #[test]
    fn removing_everything_leaves_empty_root() {
        let (xml, result) = run(&other(&['a', 'b']), &['a', 'b']);
        assert_eq!(result.count, 0);
        assert!(xml.ends_with("<otherdata packages=\"3\">\n</otherdata>\n"));
    }

    #[test]
    fn self_closing_root_passes_through() {
        let (xml, result) = run(r#"<otherdata packages="0"/>"#, &['a']);
        assert_eq!(result.count, 0);
        assert_eq!(xml, r#"<otherdata packages="0"/>"#);
    }
}
