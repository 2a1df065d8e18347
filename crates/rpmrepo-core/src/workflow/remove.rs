use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::publish::publish;
use super::{PUBLISH_ATTEMPTS, Snapshot, TmpArea, produced_kinds, stage_catalogs};
use crate::config::RepoConfig;
use crate::error::{MetadataError, Result};
use crate::storage::Storage;
use crate::update::MetadataUpdate;

/// Outcome of one remove run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    pub removed: u64,
    /// Records left in the published catalogs.
    pub total: u64,
}

/// Removes packages from the published repository.
pub struct RepoRemove {
    storage: Arc<dyn Storage>,
    config: RepoConfig,
}

impl RepoRemove {
    pub fn new(storage: Arc<dyn Storage>, config: RepoConfig) -> Self {
        Self { storage, config }
    }

    /// Remove package files by key, dropping their records from the catalogs.
    ///
    /// Keys that do not exist are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Storage, prune and lock failures.
    pub async fn remove_keys(&self, keys: &[String]) -> Result<RemoveReport> {
        let mut checksums = HashSet::new();
        let mut present = Vec::new();
        for key in keys {
            if !self.storage.exists(key).await? {
                warn!(%key, "no such package, skipping");
                continue;
            }
            let bytes = self.storage.get(key).await?;
            checksums.insert(self.config.digest.compute(&bytes).hex().to_string());
            present.push(key.clone());
        }
        self.run(checksums, present).await
    }

    /// Remove records by identity; package files are left in place.
    ///
    /// # Errors
    ///
    /// Storage, prune and lock failures.
    pub async fn remove_checksums(&self, checksums: HashSet<String>) -> Result<RemoveReport> {
        let checksums = checksums.into_iter().map(|c| c.trim().to_ascii_lowercase()).collect();
        self.run(checksums, Vec::new()).await
    }

    async fn run(&self, checksums: HashSet<String>, packages: Vec<String>) -> Result<RemoveReport> {
        if checksums.is_empty() {
            info!("nothing to remove");
            return Ok(RemoveReport::default());
        }
        let mut attempt = 1;
        let report = loop {
            match self.attempt(&checksums, &packages).await {
                Err(MetadataError::Conflict { .. }) if attempt < PUBLISH_ATTEMPTS => {
                    warn!(attempt, "repository changed during remove, starting over");
                    attempt += 1;
                }
                result => break result?,
            }
        };
        info!(removed = report.removed, total = report.total, "remove complete");
        Ok(report)
    }

    async fn attempt(&self, checksums: &HashSet<String>, packages: &[String]) -> Result<RemoveReport> {
        let mut present = Vec::with_capacity(packages.len());
        for key in packages {
            if self.storage.exists(key).await? {
                present.push(key.clone());
            }
        }
        let scratch = tempfile::tempdir()?;
        let snapshot = Snapshot::download(self.storage.as_ref(), &self.config, scratch.path()).await?;
        let items: Vec<_> = snapshot
            .items(&produced_kinds(&self.config), scratch.path())
            .into_iter()
            .filter(|item| item.input.is_some())
            .collect();
        if items.is_empty() {
            info!("no published catalogs");
            return Ok(RemoveReport::default());
        }

        let outcome = MetadataUpdate::default().remove(items.clone(), checksums).await?;
        let report = RemoveReport {
            removed: outcome.removed,
            total: outcome.counts.values().copied().max().unwrap_or(0),
        };
        if report.removed == 0 && present.is_empty() {
            info!("no matching records, catalogs untouched");
            return Ok(report);
        }

        let tmp = TmpArea::new();
        let result = async {
            let mut moves =
                stage_catalogs(self.storage.as_ref(), &self.config, &tmp, &items, &snapshot.keys).await?;
            moves.extend(present.iter().map(|key| (key.clone(), tmp.backup(key))));
            publish(&self.storage, &self.config, &tmp, snapshot.base.as_ref(), &moves).await
        }
        .await;
        tmp.clean(self.storage.as_ref()).await;
        result?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OpendalStorage;
    use crate::inspect::{self, check};
    use crate::repomd::REPOMD;
    use crate::testing::{TestStorage, package_image};
    use crate::workflow::RepoAdd;
    use rpmrepo_schema::Digest;
    use tokio::sync::Notify;

    async fn seeded() -> Arc<dyn Storage> {
        let storage: Arc<dyn Storage> = Arc::new(OpendalStorage::memory().unwrap());
        for name in ["a", "b", "c"] {
            storage
                .put(&format!(".add/{name}.rpm"), package_image(name, "1"))
                .await
                .unwrap();
        }
        RepoAdd::new(Arc::clone(&storage), RepoConfig::default())
            .run()
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn remove_by_key_drops_records_and_files() {
        let storage = seeded().await;
        let remove = RepoRemove::new(Arc::clone(&storage), RepoConfig::default());
        let report = remove
            .remove_keys(&["a.rpm".to_string(), "b.rpm".to_string(), "zz.rpm".to_string()])
            .await
            .unwrap();
        assert_eq!(report, RemoveReport { removed: 2, total: 1 });
        assert!(!storage.exists("a.rpm").await.unwrap());
        assert!(storage.exists("c.rpm").await.unwrap());
        assert!(storage.list(".tmp/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_checksum_is_a_no_op() {
        let storage = seeded().await;
        let before = storage.list("repodata/").await.unwrap();
        let remove = RepoRemove::new(Arc::clone(&storage), RepoConfig::default());
        let unknown = Digest::Sha256.compute(b"nothing").hex().to_string();
        let report = remove.remove_checksums([unknown].into_iter().collect()).await.unwrap();
        assert_eq!(report, RemoveReport { removed: 0, total: 3 });
        assert_eq!(storage.list("repodata/").await.unwrap(), before);
    }

    #[tokio::test]
    async fn remove_by_checksum_keeps_files() {
        let storage = seeded().await;
        let id = Digest::Sha256.compute(&package_image("c", "1")).hex().to_uppercase();
        let remove = RepoRemove::new(Arc::clone(&storage), RepoConfig::default());
        let report = remove.remove_checksums([id].into_iter().collect()).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.total, 2);
        assert!(storage.exists("c.rpm").await.unwrap());
    }

    #[tokio::test]
    async fn remove_keeps_packages_added_meanwhile() {
        let storage = seeded().await;
        storage.put(".add/d.rpm", package_image("d", "1")).await.unwrap();
        let (reached, resume) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        let paused: Arc<dyn Storage> = Arc::new(
            TestStorage::over(Arc::clone(&storage)).gate_put(REPOMD, Arc::clone(&reached), Arc::clone(&resume)),
        );
        let remove = RepoRemove::new(paused, RepoConfig::default());
        let add = RepoAdd::new(Arc::clone(&storage), RepoConfig::default());

        let keys = ["a.rpm".to_string()];
        let (removed, added) = tokio::join!(remove.remove_keys(&keys), async {
            reached.notified().await;
            let report = add.run().await;
            resume.notify_one();
            report
        });
        assert_eq!(added.unwrap().total, 4);
        assert_eq!(removed.unwrap(), RemoveReport { removed: 1, total: 3 });

        let catalogs = inspect::published(storage.as_ref(), "repodata/").await.unwrap();
        assert!(check(&catalogs).is_empty());
        let d = Digest::Sha256.compute(&package_image("d", "1")).hex().to_string();
        assert!(catalogs.iter().all(|c| c.ids.len() == 3 && c.ids.contains(&d)));
        assert!(!storage.exists("a.rpm").await.unwrap());
    }
}
