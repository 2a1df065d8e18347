pub mod config;
pub mod emit;
pub mod error;
pub mod inspect;
pub mod lock;
pub mod merge;
pub mod patch;
pub mod prune;
pub mod repomd;
pub mod rpm;
pub mod storage;
pub mod update;
pub mod workflow;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RepoConfig;
pub use error::{MetadataError, Result};
pub use storage::{OpendalStorage, Storage};
pub use update::{CatalogItem, MetadataUpdate};
pub use workflow::{AddReport, RemoveReport, RepoAdd, RepoRemove};

/// Key prefix under which in-flight artifacts are staged before publish.
pub const TMP_PREFIX: &str = ".tmp";
