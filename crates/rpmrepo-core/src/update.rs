//! Append and remove across the three catalogs, kept consistent.
//!
//! Append is all-or-nothing: finishing tasks write `<output>.part` files that
//! are renamed into place only after every task succeeded and the dependent
//! counts agree with the primary count.

use rpmrepo_schema::{CatalogKind, PackageDescriptor};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::emit::{PathFilter, RecordEmitter};
use crate::error::{MetadataError, Result};
use crate::merge::{MergeResult, merge_dependent, merge_primary};
use crate::patch::patch_count;
use crate::prune::prune;

/// One catalog taking part in an update.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub kind: CatalogKind,
    /// Current document; `None` means an empty catalog.
    pub input: Option<PathBuf>,
    pub output: PathBuf,
}

impl CatalogItem {
    pub fn new(kind: CatalogKind, input: Option<PathBuf>, output: PathBuf) -> Self {
        Self {
            kind,
            input,
            output,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub count: u64,
    /// Identities of the records added to every catalog.
    pub accepted: HashSet<String>,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Records removed from primary.
    pub removed: u64,
    pub counts: BTreeMap<CatalogKind, u64>,
}

/// The update orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    filter: PathFilter,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn part_path(output: &Path) -> PathBuf {
    with_suffix(output, ".part")
}

/// Rename every `(part, output)` pair into place, all or nothing.
///
/// Existing outputs are set aside as `<output>.orig` until every rename
/// succeeded; on failure they are put back and the remaining parts removed.
fn commit(pairs: &[(PathBuf, PathBuf)]) -> Result<()> {
    let mut done: Vec<(&Path, Option<PathBuf>)> = Vec::new();
    let mut failure = None;
    for (part, output) in pairs {
        let orig = output.exists().then(|| with_suffix(output, ".orig"));
        if let Some(orig) = &orig {
            if let Err(e) = std::fs::rename(output, orig) {
                failure = Some(e);
                break;
            }
        }
        if let Err(e) = std::fs::rename(part, output) {
            done.push((output.as_path(), orig));
            failure = Some(e);
            break;
        }
        done.push((output.as_path(), orig));
    }

    let Some(e) = failure else {
        for orig in done.iter().filter_map(|(_, orig)| orig.as_ref()) {
            if let Err(err) = std::fs::remove_file(orig) {
                warn!(path = %orig.display(), error = %err, "could not remove replaced catalog");
            }
        }
        return Ok(());
    };
    for (output, orig) in done.iter().rev() {
        let restored = match orig {
            Some(orig) => std::fs::rename(orig, output),
            None if output.exists() => std::fs::remove_file(output),
            None => Ok(()),
        };
        if let Err(err) = restored {
            warn!(output = %output.display(), error = %err, "could not restore catalog");
        }
    }
    for (part, _) in pairs.iter().filter(|(part, _)| part.exists()) {
        if let Err(err) = std::fs::remove_file(part) {
            warn!(part = %part.display(), error = %err, "could not remove partial catalog");
        }
    }
    Err(e.into())
}

fn open_input(path: Option<&Path>) -> Result<Option<BufReader<File>>> {
    path.map(|p| File::open(p).map(BufReader::new))
        .transpose()
        .map_err(Into::into)
}

/// Patch `body` into `<output>.part`.
fn finish(kind: CatalogKind, body: &Path, count: u64, output: &Path) -> Result<()> {
    let input = BufReader::new(File::open(body)?);
    let out = BufWriter::new(File::create(part_path(output))?);
    patch_count(input, kind, count, out)
}

impl MetadataUpdate {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    fn emitter(&self, kind: CatalogKind) -> RecordEmitter {
        RecordEmitter::for_kind(kind, &self.filter)
    }

    /// Append `packages` to every catalog in `items`.
    ///
    /// Exactly one item per kind is expected; a primary item is required.
    /// On error no output file is created or replaced.
    ///
    /// # Errors
    ///
    /// [`MetadataError::MissingPrimary`] without a primary item,
    /// [`MetadataError::Inconsistent`] when a dependent catalog disagrees with
    /// primary, or the first merge/patch failure.
    pub async fn append<P>(&self, items: Vec<CatalogItem>, packages: Arc<Vec<P>>) -> Result<AppendOutcome>
    where
        P: PackageDescriptor + 'static,
    {
        let primary = items
            .iter()
            .find(|item| item.kind == CatalogKind::Primary)
            .cloned()
            .ok_or(MetadataError::MissingPrimary)?;
        let scratch = tempfile::tempdir()?;

        let body = scratch.path().join("primary.body");
        let merge = {
            let body = body.clone();
            let input = primary.input.clone();
            let pkgs = Arc::clone(&packages);
            let emitter = self.emitter(CatalogKind::Primary);
            tokio::task::spawn_blocking(move || -> Result<MergeResult> {
                let out = BufWriter::new(File::create(&body)?);
                merge_primary(open_input(input.as_deref())?, pkgs.as_slice(), &emitter, out)
            })
            .await??
        };
        info!(
            count = merge.count(),
            accepted = merge.accepted().len(),
            duplicates = merge.duplicates(),
            "primary merged"
        );

        let parts: Vec<PathBuf> = items.iter().map(|item| part_path(&item.output)).collect();
        let accepted = Arc::new(merge.accepted().clone());
        let mut tasks = JoinSet::new();
        for item in items {
            let kind = item.kind;
            if kind == CatalogKind::Primary {
                let (body, count) = (body.clone(), merge.count());
                tasks.spawn_blocking(move || {
                    finish(kind, &body, count, &item.output).map(|()| (item, count))
                });
                continue;
            }
            let body = scratch.path().join(format!("{}.body", kind.name()));
            let pkgs = Arc::clone(&packages);
            let accepted = Arc::clone(&accepted);
            let emitter = self.emitter(kind);
            tasks.spawn_blocking(move || -> Result<(CatalogItem, u64)> {
                let out = BufWriter::new(File::create(&body)?);
                let input = open_input(item.input.as_deref())?;
                let count = merge_dependent(input, pkgs.as_slice(), &emitter, &accepted, out)?;
                finish(kind, &body, count, &item.output)?;
                Ok((item, count))
            });
        }

        let mut done = Vec::new();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(MetadataError::from).and_then(|r| r) {
                Ok(finished) => done.push(finished),
                Err(e) => {
                    warn!(error = %e, "catalog finishing task failed");
                    failure.get_or_insert(e);
                }
            }
        }
        if failure.is_none() {
            failure = done
                .iter()
                .find(|(_, count)| *count != merge.count())
                .map(|(item, count)| MetadataError::Inconsistent {
                    kind: item.kind,
                    expected: merge.count(),
                    actual: *count,
                });
        }
        if let Some(e) = failure {
            for part in parts.iter().filter(|p| p.exists()) {
                if let Err(err) = std::fs::remove_file(part) {
                    warn!(part = %part.display(), error = %err, "could not remove partial catalog");
                }
            }
            return Err(e);
        }

        let pairs: Vec<(PathBuf, PathBuf)> = done
            .iter()
            .map(|(item, _)| (part_path(&item.output), item.output.clone()))
            .collect();
        commit(&pairs)?;
        for (item, count) in &done {
            debug!(kind = %item.kind, count, output = %item.output.display(), "catalog written");
        }
        Ok(AppendOutcome {
            count: merge.count(),
            accepted: merge.accepted().clone(),
            duplicates: merge.duplicates(),
        })
    }

    /// Drop `checksums` from every catalog in `items` that has an input.
    ///
    /// Catalogs are processed one after another, each committed before the next.
    ///
    /// # Errors
    ///
    /// The first prune/patch failure, or [`MetadataError::Inconsistent`] when
    /// the surviving counts disagree.
    pub async fn remove(&self, items: Vec<CatalogItem>, checksums: &HashSet<String>) -> Result<RemoveOutcome> {
        let scratch = tempfile::tempdir()?;
        let removal = Arc::new(checksums.clone());
        let mut outcome = RemoveOutcome::default();
        for item in items {
            let Some(input) = item.input.clone() else {
                debug!(kind = %item.kind, "no catalog to prune");
                continue;
            };
            let kind = item.kind;
            let body = scratch.path().join(format!("{}.body", kind.name()));
            let removal = Arc::clone(&removal);
            let output = item.output.clone();
            let result = tokio::task::spawn_blocking(move || {
                let reader = BufReader::new(File::open(&input)?);
                let result = prune(reader, kind, &removal, BufWriter::new(File::create(&body)?))?;
                finish(kind, &body, result.count, &output)?;
                commit(&[(part_path(&output), output)])?;
                Ok::<_, MetadataError>(result)
            })
            .await??;
            info!(%kind, removed = result.removed, count = result.count, "catalog pruned");
            if kind == CatalogKind::Primary {
                outcome.removed = result.removed;
            }
            outcome.counts.insert(kind, result.count);
        }

        if let Some(&expected) = outcome.counts.get(&CatalogKind::Primary) {
            if let Some((&kind, &actual)) = outcome.counts.iter().find(|(_, c)| **c != expected) {
                return Err(MetadataError::Inconsistent {
                    kind,
                    expected,
                    actual,
                });
            }
        }
        Ok(outcome)
    }
}
