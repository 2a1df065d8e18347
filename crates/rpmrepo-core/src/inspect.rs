//! Read-only catalog summaries and cross-catalog agreement checks.

use flate2::read::GzDecoder;
use rpmrepo_schema::{COUNT_ATTR, CatalogKind, Digest};
use std::collections::HashSet;
use std::fmt;
use std::io::{BufRead, BufReader};

use crate::error::Result;
use crate::repomd::Manifest;
use crate::storage::Storage;
use crate::xml::{CatalogReader, Chunk};

/// Declared count and record identities of one catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    pub kind: CatalogKind,
    pub declared: Option<u64>,
    pub ids: Vec<String>,
}

impl CatalogSummary {
    /// Stream a catalog, keeping only the count attribute and the identities.
    ///
    /// # Errors
    ///
    /// Fails on malformed documents and read errors.
    pub fn read<R: BufRead>(input: R, kind: CatalogKind) -> Result<Self> {
        let mut reader = CatalogReader::new(input, kind);
        let mut summary = Self {
            kind,
            declared: None,
            ids: Vec::new(),
        };
        while let Some(chunk) = reader.next_chunk()? {
            match chunk {
                Chunk::Root { start, .. } => {
                    for attr in start.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == COUNT_ATTR.as_bytes() {
                            summary.declared = attr.unescape_value()?.trim().parse().ok();
                        }
                    }
                }
                Chunk::Package(record) => summary.ids.push(record.pkgid),
                _ => {}
            }
        }
        Ok(summary)
    }

    pub fn actual(&self) -> u64 {
        self.ids.len() as u64
    }
}

/// Summaries of every catalog listed by the `repomd.xml` under `prefix`, primary first.
///
/// An unpublished repository has no summaries.
///
/// # Errors
///
/// Storage failures and malformed or corrupt catalogs.
pub async fn published(storage: &dyn Storage, prefix: &str) -> Result<Vec<CatalogSummary>> {
    let Some(manifest) = Manifest::load(storage, prefix, Digest::Sha256).await? else {
        return Ok(Vec::new());
    };
    let mut summaries = Vec::new();
    for (kind, key) in manifest.catalogs {
        let gz = storage.get(&key).await?;
        let summary = tokio::task::spawn_blocking(move || {
            CatalogSummary::read(BufReader::new(GzDecoder::new(gz.as_slice())), kind)
        })
        .await??;
        summaries.push(summary);
    }
    Ok(summaries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    CountMismatch {
        kind: CatalogKind,
        declared: Option<u64>,
        actual: u64,
    },
    DuplicateRecord { kind: CatalogKind, pkgid: String },
    Missing { kind: CatalogKind, pkgid: String },
    Unexpected { kind: CatalogKind, pkgid: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch {
                kind,
                declared: Some(declared),
                actual,
            } => write!(f, "{kind}: declares {declared} packages, holds {actual}"),
            Self::CountMismatch { kind, actual, .. } => {
                write!(f, "{kind}: no {COUNT_ATTR} attribute, holds {actual}")
            }
            Self::DuplicateRecord { kind, pkgid } => write!(f, "{kind}: {pkgid} listed twice"),
            Self::Missing { kind, pkgid } => write!(f, "{kind}: missing {pkgid} present in primary"),
            Self::Unexpected { kind, pkgid } => write!(f, "{kind}: {pkgid} not present in primary"),
        }
    }
}

/// Compare each summary with itself and every dependent with the primary.
///
/// Summaries for kinds without a primary counterpart are only self-checked.
pub fn check(summaries: &[CatalogSummary]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for summary in summaries {
        if summary.declared != Some(summary.actual()) {
            findings.push(Finding::CountMismatch {
                kind: summary.kind,
                declared: summary.declared,
                actual: summary.actual(),
            });
        }
        let mut seen = HashSet::new();
        for id in &summary.ids {
            if !seen.insert(id.as_str()) {
                findings.push(Finding::DuplicateRecord {
                    kind: summary.kind,
                    pkgid: id.clone(),
                });
            }
        }
    }

    let Some(primary) = summaries.iter().find(|s| s.kind == CatalogKind::Primary) else {
        return findings;
    };
    let reference: HashSet<&str> = primary.ids.iter().map(String::as_str).collect();
    for summary in summaries.iter().filter(|s| s.kind != CatalogKind::Primary) {
        let ids: HashSet<&str> = summary.ids.iter().map(String::as_str).collect();
        for missing in primary.ids.iter().filter(|id| !ids.contains(id.as_str())) {
            findings.push(Finding::Missing {
                kind: summary.kind,
                pkgid: missing.clone(),
            });
        }
        for extra in summary.ids.iter().filter(|id| !reference.contains(id.as_str())) {
            findings.push(Finding::Unexpected {
                kind: summary.kind,
                pkgid: extra.clone(),
            });
        }
    }
    findings
}
