//! Second pass of the two-pass write: fix the root count attribute.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rpmrepo_schema::{COUNT_ATTR, CatalogKind};
use std::borrow::Cow;
use std::io::{BufRead, Write};

use crate::error::{MetadataError, Result};
use crate::xml::XmlWriter;

/// Re-stream `input` to `output`, setting the root's `packages` attribute to `count`.
///
/// Every other event, and every other byte of the root tag, is written back
/// unchanged. The attribute is appended when the root does not carry one yet.
///
/// # Errors
///
/// Fails when the document has no root element, on XML syntax errors, and on
/// I/O failure.
pub fn patch_count<R: BufRead, W: Write>(
    input: R,
    kind: CatalogKind,
    count: u64,
    output: W,
) -> Result<()> {
    let mut reader = Reader::from_reader(input);
    let mut out = XmlWriter::new(output);
    let mut buf = Vec::new();
    let mut patched = false;
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(root) if !patched => {
                out.event(Event::Start(with_count(&root, kind, count)?))?;
                patched = true;
            }
            Event::Empty(root) if !patched => {
                out.event(Event::Empty(with_count(&root, kind, count)?))?;
                patched = true;
            }
            event => out.event(event)?,
        }
    }
    if !patched {
        return Err(MetadataError::malformed(kind, "no root element to patch"));
    }
    out.get_mut().flush()?;
    Ok(())
}

/// Splice `count` into the raw root tag, keeping quoting and spacing as read.
fn with_count(root: &BytesStart<'_>, kind: CatalogKind, count: u64) -> Result<BytesStart<'static>> {
    let content: &[u8] = root;
    let value = count.to_string();
    let mut span = None;
    for attr in root.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != COUNT_ATTR.as_bytes() {
            continue;
        }
        let Cow::Borrowed(raw) = attr.value else {
            return Err(MetadataError::malformed(kind, "root count attribute is not raw"));
        };
        let start = (raw.as_ptr() as usize).wrapping_sub(content.as_ptr() as usize);
        if start > content.len() || raw.len() > content.len() - start {
            return Err(MetadataError::malformed(kind, "root count attribute is not raw"));
        }
        span = Some(start..start + raw.len());
    }

    let mut bytes = content.to_vec();
    match span {
        Some(range) => {
            bytes.splice(range, value.bytes());
        }
        None => {
            let end = bytes
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(0, |at| at + 1);
            let trailing = bytes.split_off(end);
            bytes.extend_from_slice(format!(" {COUNT_ATTR}=\"{value}\"").as_bytes());
            bytes.extend(trailing);
        }
    }
    let name_len = root.name().as_ref().len();
    let text = String::from_utf8(bytes).map_err(|e| MetadataError::malformed(kind, e))?;
    Ok(BytesStart::from_content(text, name_len))
}
