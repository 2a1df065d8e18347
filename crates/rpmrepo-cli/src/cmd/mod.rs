//! Subcommand implementations.

pub mod add;
pub mod check;
pub mod remove;

use anyhow::{Context, Result};
use rpmrepo_core::{OpendalStorage, RepoConfig, Storage};
use std::path::Path;
use std::sync::Arc;

/// Filesystem storage rooted at `root` plus the effective configuration.
///
/// # Errors
///
/// Fails if the configuration cannot be loaded or the storage cannot be opened.
pub async fn open(root: &Path, config: Option<&Path>) -> Result<(Arc<dyn Storage>, RepoConfig)> {
    let config = RepoConfig::load(config)
        .await
        .context("Failed to load configuration")?;
    let storage = OpendalStorage::fs(root)
        .with_context(|| format!("Failed to open repository at {}", root.display()))?;
    Ok((Arc::new(storage), config))
}
