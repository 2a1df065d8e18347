//! Repository configuration: optional TOML file, then environment overrides.

use rpmrepo_schema::Digest;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::emit::PathFilter;
use crate::error::{MetadataError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_delay_ms: 200,
            ttl_secs: 300,
        }
    }
}

impl LockConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Settings shared by the add and remove workflows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Digest used for package identities and catalog checksums.
    pub digest: Digest,
    /// Produce and publish `filelists.xml`.
    pub filelists: bool,
    /// Key prefix holding uploads not yet merged.
    pub staging: String,
    /// Key prefix of the published catalogs.
    pub metadata: String,
    /// Regular expressions for paths left out of file listings.
    pub exclude_paths: Vec<String>,
    pub lock: LockConfig,
    /// Packages decoded concurrently during discovery.
    pub concurrency: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            digest: Digest::Sha256,
            filelists: true,
            staging: ".add".to_string(),
            metadata: "repodata".to_string(),
            exclude_paths: Vec::new(),
            lock: LockConfig::default(),
            concurrency: 8,
        }
    }
}

impl RepoConfig {
    /// Load from `path` when given, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or an override is invalid.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Config`] on syntax or type errors.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MetadataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RPMREPO_DIGEST` and `RPMREPO_FILELISTS` as looked up by `var`,
    /// then validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Config`] for unparseable values.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("RPMREPO_DIGEST") {
            self.digest = v.parse().map_err(MetadataError::Config)?;
        }
        if let Some(v) = var("RPMREPO_FILELISTS") {
            self.filelists = parse_flag("RPMREPO_FILELISTS", &v)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MetadataError::Config("concurrency must be at least 1".into()));
        }
        if self.staging.trim_matches('/').is_empty() || self.metadata.trim_matches('/').is_empty() {
            return Err(MetadataError::Config(
                "staging and metadata prefixes must not be empty".into(),
            ));
        }
        self.path_filter().map(|_| ())
    }

    /// Compiled `exclude_paths`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Config`] for an invalid pattern.
    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(&self.exclude_paths).map_err(|e| MetadataError::Config(e.to_string()))
    }

    /// Staging prefix with a trailing slash.
    pub fn staging_prefix(&self) -> String {
        format!("{}/", self.staging.trim_matches('/'))
    }

    /// Metadata prefix with a trailing slash.
    pub fn metadata_prefix(&self) -> String {
        format!("{}/", self.metadata.trim_matches('/'))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MetadataError::Config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}
