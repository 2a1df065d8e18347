//! Manifest regeneration: compressed catalogs and `repomd.xml`.

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rpmrepo_schema::{CatalogKind, Checksum, Digest};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::storage::Storage;
use crate::xml::XmlWriter;

pub const REPOMD: &str = "repomd.xml";

/// A finished catalog ready for upload, with its manifest facts.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    pub kind: CatalogKind,
    pub gz: Vec<u8>,
    pub checksum: Checksum,
    pub open_checksum: Checksum,
    pub open_size: u64,
    pub timestamp: i64,
}

impl CatalogFile {
    /// Compress the plain XML at `path` and digest both forms.
    ///
    /// # Errors
    ///
    /// Fails on read errors.
    pub fn compress(kind: CatalogKind, path: &Path, digest: Digest) -> Result<Self> {
        let open_checksum = digest.compute_reader(BufReader::new(File::open(path)?))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let open_size = io::copy(&mut BufReader::new(File::open(path)?), &mut encoder)?;
        let gz = encoder.finish()?;
        Ok(Self {
            kind,
            checksum: digest.compute(&gz),
            gz,
            open_checksum,
            open_size,
            timestamp: Utc::now().timestamp(),
        })
    }

    /// File name under the metadata prefix, unique per content.
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.checksum.hex(), self.kind.file_suffix())
    }
}

/// Decompress a gzip stream into `dest`.
///
/// # Errors
///
/// Fails on corrupt input or write errors.
pub fn gunzip_to<R: Read>(input: R, dest: &Path) -> Result<u64> {
    let mut out = io::BufWriter::new(File::create(dest)?);
    let copied = io::copy(&mut GzDecoder::new(input), &mut out)?;
    out.flush()?;
    Ok(copied)
}

/// Render `repomd.xml` for `files`, whose hrefs are `<metadata>/<file_name>`.
///
/// # Errors
///
/// Only fails if the in-memory writer does.
pub fn render(files: &[CatalogFile], metadata: &str) -> Result<Vec<u8>> {
    let mut out = XmlWriter::new(Vec::new());
    out.declaration()?;
    out.newline()?;
    out.start(
        "repomd",
        &[
            ("xmlns", "http://linux.duke.edu/metadata/repo"),
            ("xmlns:rpm", "http://linux.duke.edu/metadata/rpm"),
        ],
    )?;
    let revision = Utc::now().timestamp().to_string();
    out.newline()?;
    out.element("revision", &[], &revision)?;
    for file in files {
        let href = format!("{}/{}", metadata.trim_matches('/'), file.file_name());
        out.newline()?;
        out.start("data", &[("type", file.kind.name())])?;
        out.element(
            "checksum",
            &[("type", file.checksum.digest().name())],
            file.checksum.hex(),
        )?;
        out.element(
            "open-checksum",
            &[("type", file.open_checksum.digest().name())],
            file.open_checksum.hex(),
        )?;
        out.empty("location", &[("href", href.as_str())])?;
        out.element("timestamp", &[], &file.timestamp.to_string())?;
        out.element("size", &[], &file.gz.len().to_string())?;
        out.element("open-size", &[], &file.open_size.to_string())?;
        out.end("data")?;
    }
    out.newline()?;
    out.end("repomd")?;
    out.newline()?;
    Ok(out.into_inner())
}

/// The `repomd.xml` a workflow started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Digest of the raw manifest bytes.
    pub checksum: Checksum,
    /// Storage key of each listed catalog.
    pub catalogs: BTreeMap<CatalogKind, String>,
}

impl Manifest {
    /// Read the manifest under `prefix`; `None` when nothing is published yet.
    ///
    /// # Errors
    ///
    /// Storage failures and malformed manifests.
    pub async fn load(storage: &dyn Storage, prefix: &str, digest: Digest) -> Result<Option<Self>> {
        let key = format!("{}/{REPOMD}", prefix.trim_end_matches('/'));
        let Some(bytes) = storage.get_if_exists(&key).await? else {
            return Ok(None);
        };
        Ok(Some(Self {
            checksum: digest.compute(&bytes),
            catalogs: locations(&bytes)?,
        }))
    }
}

/// Catalog hrefs listed in a `repomd.xml`, by kind. Unknown data types are skipped.
///
/// # Errors
///
/// Fails on XML syntax errors.
pub fn locations(manifest: &[u8]) -> Result<BTreeMap<CatalogKind, String>> {
    let mut reader = Reader::from_reader(manifest);
    let mut buf = Vec::new();
    let mut current = None;
    let mut found = BTreeMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                current = attribute(&e, b"type")?
                    .and_then(|t| CatalogKind::ALL.into_iter().find(|kind| kind.name() == t));
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => current = None,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"location" => {
                if let (Some(kind), Some(href)) = (current, attribute(&e, b"href")?) {
                    found.insert(kind, href);
                }
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
