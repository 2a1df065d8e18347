//! Add command

use anyhow::{Context, Result, bail};
use rpmrepo_core::RepoAdd;
use std::path::{Path, PathBuf};

/// Stage `files` and merge everything staged.
///
/// # Errors
///
/// Fails on unreadable files or any workflow error.
pub async fn add(root: &Path, config: Option<&Path>, files: &[PathBuf]) -> Result<()> {
    let (storage, config) = super::open(root, config).await?;

    for file in files {
        let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            bail!("Not a file: {}", file.display());
        };
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let key = format!("{}{name}", config.staging_prefix());
        storage.put(&key, bytes).await?;
        tracing::debug!(%key, "staged");
    }

    let report = RepoAdd::new(storage, config).run().await?;
    println!(
        "added {} package(s), {} duplicate(s), {} total",
        report.accepted, report.duplicates, report.total
    );
    for key in &report.rejected {
        println!("  rejected {key}");
    }
    Ok(())
}
