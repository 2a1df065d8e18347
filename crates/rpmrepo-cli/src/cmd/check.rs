//! Check command

use anyhow::{Result, bail};
use rpmrepo_core::inspect::{self, check as find_problems};
use std::path::Path;

/// Report declared and actual counts of every published catalog.
///
/// # Errors
///
/// Fails when a catalog cannot be read or the catalogs disagree.
pub async fn check(root: &Path, config: Option<&Path>) -> Result<()> {
    let (storage, config) = super::open(root, config).await?;
    let summaries = inspect::published(storage.as_ref(), &config.metadata_prefix()).await?;
    if summaries.is_empty() {
        println!("no published catalogs under {}", config.metadata_prefix());
        return Ok(());
    }

    for summary in &summaries {
        let declared = summary
            .declared
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!("{:<10} declared {declared:>6}  actual {:>6}", summary.kind, summary.actual());
    }
    let findings = find_problems(&summaries);
    if findings.is_empty() {
        println!("catalogs consistent");
        return Ok(());
    }
    for finding in &findings {
        println!("  {finding}");
    }
    bail!("{} inconsistencies found", findings.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_repository_is_consistent() {
        let root = tempfile::tempdir().unwrap();
        check(root.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_catalog_fails() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("repodata")).unwrap();
        std::fs::write(root.path().join("repodata/primary.xml.gz"), b"not gzip").unwrap();
        std::fs::write(
            root.path().join("repodata/repomd.xml"),
            r#"<repomd><data type="primary"><location href="repodata/primary.xml.gz"/></data></repomd>"#,
        )
        .unwrap();
        assert!(check(root.path(), None).await.is_err());
    }
}
