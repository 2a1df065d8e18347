//! Remove command

use anyhow::Result;
use rpmrepo_core::RepoRemove;
use std::path::Path;

/// Remove package files by key and records by checksum.
///
/// # Errors
///
/// Fails on any workflow error.
pub async fn remove(root: &Path, config: Option<&Path>, keys: &[String], checksums: &[String]) -> Result<()> {
    let (storage, config) = super::open(root, config).await?;
    let remover = RepoRemove::new(storage, config);

    if !keys.is_empty() {
        let report = remover.remove_keys(keys).await?;
        println!("removed {} package(s), {} left", report.removed, report.total);
    }
    if !checksums.is_empty() {
        let report = remover
            .remove_checksums(checksums.iter().cloned().collect())
            .await?;
        println!("removed {} record(s), {} left", report.removed, report.total);
    }
    Ok(())
}
