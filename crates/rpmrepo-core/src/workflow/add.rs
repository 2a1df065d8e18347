use futures::stream::{self as fstream, StreamExt};
use rpmrepo_schema::{Digest, PackageDescriptor};
use std::sync::Arc;
use tracing::{info, warn};

use super::publish::publish;
use super::{PUBLISH_ATTEMPTS, Snapshot, TmpArea, produced_kinds, stage_catalogs};
use crate::config::RepoConfig;
use crate::error::{MetadataError, Result};
use crate::rpm::{HeaderDecoder, RpmHeaderReader, RpmPackage};
use crate::storage::Storage;
use crate::update::MetadataUpdate;

/// Outcome of one add run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Packages added to the catalogs.
    pub accepted: u64,
    /// Staged packages already present in the catalogs.
    pub duplicates: u64,
    /// Staged keys that failed to decode and were dropped.
    pub rejected: Vec<String>,
    /// Records in the published catalogs.
    pub total: u64,
}

/// Merges staged uploads into the published repository.
pub struct RepoAdd {
    storage: Arc<dyn Storage>,
    config: RepoConfig,
    decoder: Arc<dyn HeaderDecoder>,
}

impl RepoAdd {
    pub fn new(storage: Arc<dyn Storage>, config: RepoConfig) -> Self {
        Self {
            storage,
            config,
            decoder: Arc::new(RpmHeaderReader),
        }
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn HeaderDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Decode every staged key; undecodable keys are deleted and reported.
    async fn discover(&self, staged: Vec<String>) -> Result<(Vec<(String, RpmPackage)>, Vec<String>)> {
        let prefix = self.config.staging_prefix();
        let results: Vec<Result<(String, Option<RpmPackage>)>> = fstream::iter(staged)
            .map(|key| {
                let location = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
                decode_staged(
                    Arc::clone(&self.storage),
                    Arc::clone(&self.decoder),
                    self.config.digest,
                    key,
                    location,
                )
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut packages = Vec::new();
        let mut rejected = Vec::new();
        for result in results {
            match result? {
                (key, Some(pkg)) => packages.push((key, pkg)),
                (key, None) => rejected.push(key),
            }
        }
        Ok((packages, rejected))
    }

    /// Merge everything under the staging prefix and publish the result.
    ///
    /// A run whose base `repomd.xml` changed before it could publish starts
    /// over from the staging listing.
    ///
    /// # Errors
    ///
    /// Storage, merge and lock failures, or [`MetadataError::Conflict`] once
    /// every attempt lost the race. Nothing becomes visible to readers unless
    /// the whole publish succeeds.
    pub async fn run(&self) -> Result<AddReport> {
        let mut rejected = Vec::new();
        let mut attempt = 1;
        let mut report = loop {
            match self.attempt(&mut rejected).await {
                Err(MetadataError::Conflict { .. }) if attempt < PUBLISH_ATTEMPTS => {
                    warn!(attempt, "repository changed during add, starting over");
                    attempt += 1;
                }
                result => break result?,
            }
        };
        rejected.sort();
        report.rejected = rejected;
        info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            total = report.total,
            "add complete"
        );
        Ok(report)
    }

    async fn attempt(&self, rejected: &mut Vec<String>) -> Result<AddReport> {
        let staged = self.storage.list(&self.config.staging_prefix()).await?;
        if staged.is_empty() {
            info!(staging = %self.config.staging, "nothing staged");
            return Ok(AddReport::default());
        }
        info!(count = staged.len(), "discovered staged packages");

        let (decoded, dropped) = self.discover(staged).await?;
        rejected.extend(dropped);
        let scratch = tempfile::tempdir()?;
        let snapshot = Snapshot::download(self.storage.as_ref(), &self.config, scratch.path()).await?;
        let items = snapshot.items(&produced_kinds(&self.config), scratch.path());

        let (keys, packages): (Vec<String>, Vec<RpmPackage>) = decoded.into_iter().unzip();
        let update = MetadataUpdate::new(self.config.path_filter()?);
        let outcome = update.append(items.clone(), Arc::new(packages.clone())).await?;

        let report = AddReport {
            accepted: outcome.accepted.len() as u64,
            duplicates: outcome.duplicates,
            rejected: Vec::new(),
            total: outcome.count,
        };
        let mut moves = Vec::new();
        let mut leftovers = Vec::new();
        let mut claimed = std::collections::HashSet::new();
        for (key, pkg) in keys.into_iter().zip(&packages) {
            let id = pkg.checksum().hex();
            if outcome.accepted.contains(id) && claimed.insert(id.to_string()) {
                moves.push((key, pkg.location().to_string()));
            } else {
                leftovers.push(key);
            }
        }

        if moves.is_empty() {
            info!(duplicates = report.duplicates, "no new packages, catalogs untouched");
        } else {
            let tmp = TmpArea::new();
            let result = async {
                let catalogs =
                    stage_catalogs(self.storage.as_ref(), &self.config, &tmp, &items, &snapshot.keys).await?;
                moves.extend(catalogs);
                publish(&self.storage, &self.config, &tmp, snapshot.base.as_ref(), &moves).await
            }
            .await;
            tmp.clean(self.storage.as_ref()).await;
            result?;
        }

        for key in leftovers {
            self.storage.delete(&key).await?;
        }
        Ok(report)
    }
}

/// Read, digest and decode one staged key; a decode failure deletes the key.
async fn decode_staged(
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn HeaderDecoder>,
    digest: Digest,
    key: String,
    location: String,
) -> Result<(String, Option<RpmPackage>)> {
    let bytes = storage.get(&key).await?;
    let decoded = tokio::task::spawn_blocking(move || {
        RpmPackage::from_bytes(&bytes, digest, location, decoder.as_ref())
    })
    .await?;
    match decoded {
        Ok(pkg) => Ok((key, Some(pkg))),
        Err(source) => {
            let err = MetadataError::Decode {
                key: key.clone(),
                source,
            };
            warn!(error = %err, "dropping undecodable upload");
            storage.delete(&key).await?;
            Ok((key, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{self, CatalogSummary, check};
    use crate::repomd::REPOMD;
    use crate::storage::OpendalStorage;
    use crate::testing::{TestStorage, dump, package_image};
    use rpmrepo_schema::CatalogKind;
    use tokio::sync::Notify;

    fn memory() -> Arc<dyn Storage> {
        Arc::new(OpendalStorage::memory().unwrap())
    }

    async fn published(storage: &dyn Storage) -> Vec<CatalogSummary> {
        inspect::published(storage, "repodata/").await.unwrap()
    }

    #[tokio::test]
    async fn first_publish_creates_three_catalogs() {
        let storage = memory();
        storage.put(".add/a-1.0-1.x86_64.rpm", package_image("a", "1")).await.unwrap();
        storage.put(".add/b-1.0-1.x86_64.rpm", package_image("b", "1")).await.unwrap();
        storage.put(".add/broken.rpm", b"garbage".to_vec()).await.unwrap();

        let report = RepoAdd::new(Arc::clone(&storage), RepoConfig::default()).run().await.unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, vec![".add/broken.rpm".to_string()]);
        assert_eq!(report.total, 2);

        assert!(storage.list(".add/").await.unwrap().is_empty());
        assert!(storage.exists("a-1.0-1.x86_64.rpm").await.unwrap());
        assert!(storage.exists(&format!("repodata/{REPOMD}")).await.unwrap());
        assert!(storage.list(".tmp/").await.unwrap().is_empty());
        assert!(storage.list(".locks/").await.unwrap().is_empty());

        let catalogs = published(storage.as_ref()).await;
        assert_eq!(catalogs.len(), 3);
        assert!(check(&catalogs).is_empty());
        assert!(catalogs.iter().all(|c| c.declared == Some(2)));
    }

    #[tokio::test]
    async fn second_add_appends_and_replaces_previous_generation() {
        let storage = memory();
        let add = RepoAdd::new(Arc::clone(&storage), RepoConfig::default());
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        add.run().await.unwrap();
        let first = storage.list("repodata/").await.unwrap();

        storage.put(".add/b.rpm", package_image("b", "1")).await.unwrap();
        storage.put(".add/a-copy.rpm", package_image("a", "1")).await.unwrap();
        let report = add.run().await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.total, 2);
        assert!(!storage.exists("a-copy.rpm").await.unwrap());

        let second = storage.list("repodata/").await.unwrap();
        assert_eq!(second.len(), 4);
        assert!(first.iter().filter(|k| !k.ends_with(REPOMD)).all(|k| !second.contains(k)));
        let catalogs = published(storage.as_ref()).await;
        assert!(check(&catalogs).is_empty());
        assert!(catalogs.iter().all(|c| c.ids.len() == 2));
    }

    #[tokio::test]
    async fn nothing_staged_is_a_no_op() {
        let storage = memory();
        let report = RepoAdd::new(Arc::clone(&storage), RepoConfig::default()).run().await.unwrap();
        assert_eq!(report, AddReport::default());
        assert!(storage.list("repodata/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filelists_can_be_disabled() {
        let storage = memory();
        let config = RepoConfig {
            filelists: false,
            ..RepoConfig::default()
        };
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        RepoAdd::new(Arc::clone(&storage), config).run().await.unwrap();
        let kinds: Vec<CatalogKind> = published(storage.as_ref()).await.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CatalogKind::Primary, CatalogKind::Other]);
    }

    #[tokio::test]
    async fn held_lock_defers_publish() {
        let storage = memory();
        storage
            .put(".locks/repodata", format!("other@{}", chrono::Utc::now().to_rfc3339()).into_bytes())
            .await
            .unwrap();
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        let mut config = RepoConfig::default();
        config.lock.retries = 2;
        config.lock.retry_delay_ms = 1;

        let err = RepoAdd::new(Arc::clone(&storage), config).run().await;
        assert!(matches!(err, Err(MetadataError::LockUnavailable { .. })));
        assert!(storage.exists(".add/a.rpm").await.unwrap());
        assert!(storage.list("repodata/").await.unwrap().is_empty());
        assert!(storage.list(".tmp/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_both_land() {
        let storage = memory();
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        RepoAdd::new(Arc::clone(&storage), RepoConfig::default()).run().await.unwrap();

        storage.put(".add/b.rpm", package_image("b", "1")).await.unwrap();
        storage.put(".other/c.rpm", package_image("c", "1")).await.unwrap();
        let (reached, resume) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        let paused: Arc<dyn Storage> = Arc::new(
            TestStorage::over(Arc::clone(&storage)).gate_put(REPOMD, Arc::clone(&reached), Arc::clone(&resume)),
        );
        let first = RepoAdd::new(paused, RepoConfig::default());
        let second = RepoAdd::new(
            Arc::clone(&storage),
            RepoConfig {
                staging: ".other".into(),
                ..RepoConfig::default()
            },
        );

        // the second add publishes while the first waits between staging and publish
        let (a, b) = tokio::join!(first.run(), async {
            reached.notified().await;
            let report = second.run().await;
            resume.notify_one();
            report
        });
        assert_eq!(a.unwrap().total, 3);
        assert_eq!(b.unwrap().total, 2);

        let catalogs = published(storage.as_ref()).await;
        assert!(check(&catalogs).is_empty(), "{:?}", check(&catalogs));
        assert!(catalogs.iter().all(|c| c.ids.len() == 3));
        assert_eq!(storage.list("repodata/").await.unwrap().len(), 4);
        assert!(storage.exists("b.rpm").await.unwrap());
        assert!(storage.exists("c.rpm").await.unwrap());
    }

    #[tokio::test]
    async fn failed_publish_restores_every_key() {
        let storage = memory();
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        RepoAdd::new(Arc::clone(&storage), RepoConfig::default()).run().await.unwrap();
        storage.put(".add/b.rpm", package_image("b", "1")).await.unwrap();
        let before = dump(storage.as_ref()).await;

        // package, three catalogs, repomd.xml, then the three replaced catalogs
        for n in [1, 2, 4, 5, 6, 8] {
            let failing: Arc<dyn Storage> = Arc::new(TestStorage::over(Arc::clone(&storage)).fail_move(n));
            let err = RepoAdd::new(failing, RepoConfig::default()).run().await;
            assert!(matches!(err, Err(MetadataError::Io(_))), "move {n}: {err:?}");
            assert_eq!(dump(storage.as_ref()).await, before, "move {n}");
        }
    }

    #[tokio::test]
    async fn readers_see_a_complete_manifest_during_publish() {
        let storage = memory();
        storage.put(".add/a.rpm", package_image("a", "1")).await.unwrap();
        RepoAdd::new(Arc::clone(&storage), RepoConfig::default()).run().await.unwrap();
        storage.put(".add/b.rpm", package_image("b", "1")).await.unwrap();

        // pause inside the locked publish, just before repomd.xml is replaced
        let (reached, resume) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        let paused: Arc<dyn Storage> = Arc::new(TestStorage::over(Arc::clone(&storage)).gate_put(
            "backup/repodata/repomd.xml",
            Arc::clone(&reached),
            Arc::clone(&resume),
        ));
        let add = RepoAdd::new(paused, RepoConfig::default());
        let (report, during) = tokio::join!(add.run(), async {
            reached.notified().await;
            let catalogs = published(storage.as_ref()).await;
            resume.notify_one();
            catalogs
        });
        assert_eq!(report.unwrap().total, 2);
        assert_eq!(during.len(), 3);
        assert!(check(&during).is_empty());
        assert!(during.iter().all(|c| c.ids.len() == 1));
        assert!(published(storage.as_ref()).await.iter().all(|c| c.ids.len() == 2));
    }
}
