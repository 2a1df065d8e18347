use rpmrepo_schema::Checksum;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::TmpArea;
use crate::config::RepoConfig;
use crate::error::{MetadataError, Result};
use crate::lock::StorageLock;
use crate::repomd::Manifest;
use crate::storage::Storage;

/// One publish move and what it takes to undo it.
struct Step {
    src: String,
    dst: String,
    /// Copy of the value `dst` held before the move.
    backup: Option<String>,
}

/// Started moves, undone in reverse on failure.
struct Journal<'a> {
    storage: &'a dyn Storage,
    tmp: &'a TmpArea,
    steps: Vec<Step>,
}

impl<'a> Journal<'a> {
    fn new(storage: &'a dyn Storage, tmp: &'a TmpArea) -> Self {
        Self {
            storage,
            tmp,
            steps: Vec::new(),
        }
    }

    /// Move `src` over `dst`. An existing `dst` is copied into the backup area
    /// first and stays readable until the move replaces it.
    async fn apply(&mut self, src: &str, dst: &str) -> Result<()> {
        let backup = match self.storage.get_if_exists(dst).await? {
            Some(current) => {
                let key = self.tmp.backup(dst);
                self.storage.put(&key, current).await?;
                Some(key)
            }
            None => None,
        };
        self.steps.push(Step {
            src: src.to_string(),
            dst: dst.to_string(),
            backup,
        });
        self.storage.move_key(src, dst).await
    }

    async fn undo(&self, step: &Step) -> Result<()> {
        if !self.storage.exists(&step.src).await? {
            let moved = self.storage.get(&step.dst).await?;
            self.storage.put(&step.src, moved).await?;
        }
        match &step.backup {
            Some(backup) => self.storage.move_key(backup, &step.dst).await,
            None => self.storage.delete(&step.dst).await,
        }
    }

    async fn revert(self) {
        for step in self.steps.iter().rev() {
            if let Err(e) = self.undo(step).await {
                error!(src = %step.src, dst = %step.dst, error = %e, "could not revert move");
            }
        }
    }
}

/// Perform `moves` in order under the metadata lock.
///
/// `base` is the digest of the `repomd.xml` the moves were prepared from;
/// if the published manifest changed since, nothing is moved and
/// [`MetadataError::Conflict`] is returned. If any move fails, every started
/// move is reverted before the lock is released and the failure is returned.
pub(crate) async fn publish(
    storage: &Arc<dyn Storage>,
    config: &RepoConfig,
    tmp: &TmpArea,
    base: Option<&Checksum>,
    moves: &[(String, String)],
) -> Result<()> {
    let lock = StorageLock::new(Arc::clone(storage), &config.metadata);
    let guard = lock.acquire(&config.lock).await?;

    let outcome = match Manifest::load(storage.as_ref(), &config.metadata_prefix(), config.digest).await {
        Ok(current) if current.as_ref().map(|m| &m.checksum) == base => {
            apply_all(storage.as_ref(), tmp, moves).await
        }
        Ok(_) => {
            warn!(scope = %config.metadata, "repository changed since the update was prepared");
            Err(MetadataError::Conflict {
                scope: config.metadata.clone(),
            })
        }
        Err(e) => Err(e),
    };

    if let Err(e) = guard.release().await {
        warn!(error = %e, "could not release metadata lock");
    }
    outcome
}

async fn apply_all(storage: &dyn Storage, tmp: &TmpArea, moves: &[(String, String)]) -> Result<()> {
    let mut journal = Journal::new(storage, tmp);
    for (src, dst) in moves {
        if let Err(e) = journal.apply(src, dst).await {
            warn!(%src, %dst, error = %e, "publish move failed, reverting");
            journal.revert().await;
            return Err(e);
        }
    }
    info!(moves = moves.len(), "published");
    Ok(())
}
