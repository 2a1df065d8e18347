//! Storage-level workflows: add staged uploads, remove published packages.
//!
//! Both follow the same shape: download the current catalogs into scratch
//! space, run the update orchestrator without holding any lock, stage every
//! artifact under a temporary prefix, then take the metadata lock only for the
//! key moves that publish the new generation.
//!
//! The lock is not held while preparing, so the publish step first checks
//! that `repomd.xml` is still the one the run started from. A run that lost
//! the race is redone from scratch, up to [`PUBLISH_ATTEMPTS`] times.

mod add;
mod publish;
mod remove;

pub use add::{AddReport, RepoAdd};
pub use remove::{RemoveReport, RepoRemove};

use rpmrepo_schema::{CatalogKind, Checksum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RepoConfig;
use crate::error::Result;
use crate::repomd::{self, CatalogFile, Manifest, REPOMD};
use crate::storage::Storage;
use crate::update::CatalogItem;
use crate::TMP_PREFIX;

/// Runs that lose the publish race this many times give up with a conflict.
pub(crate) const PUBLISH_ATTEMPTS: u32 = 3;

/// Published catalogs of the current generation, gunzipped into scratch space.
pub(crate) struct Snapshot {
    /// Digest of the `repomd.xml` the catalogs were found through.
    pub base: Option<Checksum>,
    /// Storage key of each published catalog.
    pub keys: BTreeMap<CatalogKind, String>,
    /// Plain XML copy of each published catalog.
    pub plain: BTreeMap<CatalogKind, PathBuf>,
}

impl Snapshot {
    pub async fn download(storage: &dyn Storage, config: &RepoConfig, dir: &Path) -> Result<Self> {
        let (base, keys) = match Manifest::load(storage, &config.metadata_prefix(), config.digest).await? {
            Some(manifest) => (Some(manifest.checksum), manifest.catalogs),
            None => (None, BTreeMap::new()),
        };
        let mut plain = BTreeMap::new();
        for (kind, key) in &keys {
            let gz = storage.get(key).await?;
            let dest = dir.join(format!("{}.xml", kind.name()));
            let target = dest.clone();
            let size = tokio::task::spawn_blocking(move || repomd::gunzip_to(gz.as_slice(), &target)).await??;
            debug!(%kind, key = %key, size, "catalog downloaded");
            plain.insert(*kind, dest);
        }
        Ok(Self { base, keys, plain })
    }

    /// One item per kind taking part in this update; outputs go to `dir`.
    pub fn items(&self, kinds: &[CatalogKind], dir: &Path) -> Vec<CatalogItem> {
        kinds
            .iter()
            .map(|kind| {
                CatalogItem::new(
                    *kind,
                    self.plain.get(kind).cloned(),
                    dir.join(format!("{}.new.xml", kind.name())),
                )
            })
            .collect()
    }
}

/// Kinds produced under `config`, primary first.
pub(crate) fn produced_kinds(config: &RepoConfig) -> Vec<CatalogKind> {
    CatalogKind::ALL
        .into_iter()
        .filter(|kind| config.filelists || *kind != CatalogKind::Filelists)
        .collect()
}

/// Per-run temporary key space.
pub(crate) struct TmpArea {
    pub root: String,
}

impl TmpArea {
    pub fn new() -> Self {
        Self {
            root: format!("{TMP_PREFIX}/{:016x}", rand::random::<u64>()),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.root, name.trim_start_matches('/'))
    }

    pub fn backup(&self, key: &str) -> String {
        self.key(&format!("backup/{}", key.trim_start_matches('/')))
    }

    /// Delete every key of this area; failures are logged.
    pub async fn clean(&self, storage: &dyn Storage) {
        let keys = match storage.list(&self.root).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(root = %self.root, error = %e, "could not list temporary keys");
                return;
            }
        };
        for key in keys {
            if let Err(e) = storage.delete(&key).await {
                tracing::warn!(%key, error = %e, "could not delete temporary key");
            }
        }
    }
}

/// Compress the orchestrator outputs, stage them plus `repomd.xml`, and
/// return the catalog and manifest moves of the publish plan.
///
/// Catalogs of the previous generation that the new one does not overwrite
/// are moved into the backup area after the manifest.
pub(crate) async fn stage_catalogs(
    storage: &dyn Storage,
    config: &RepoConfig,
    tmp: &TmpArea,
    items: &[CatalogItem],
    previous: &BTreeMap<CatalogKind, String>,
) -> Result<Vec<(String, String)>> {
    let mut files = Vec::with_capacity(items.len());
    for item in items {
        let (kind, path, digest) = (item.kind, item.output.clone(), config.digest);
        let file = tokio::task::spawn_blocking(move || CatalogFile::compress(kind, &path, digest)).await??;
        files.push(file);
    }

    let prefix = config.metadata_prefix();
    let mut moves = Vec::new();
    for file in &files {
        let name = file.file_name();
        let staged = tmp.key(&name);
        storage.put(&staged, file.gz.clone()).await?;
        moves.push((staged, format!("{prefix}{name}")));
    }
    let manifest = repomd::render(&files, &config.metadata)?;
    let staged = tmp.key(REPOMD);
    storage.put(&staged, manifest).await?;
    moves.push((staged, format!("{prefix}{REPOMD}")));

    for old in previous.values() {
        if !moves.iter().any(|(_, dst)| dst == old) {
            moves.push((old.clone(), tmp.backup(old)));
        }
    }
    Ok(moves)
}
