//! rpmrepo - incremental RPM repository metadata
//!
//! Maintains `repodata/` for a directory of RPM packages: uploads are staged,
//! merged into the existing catalogs without a rebuild, and published
//! atomically under a storage lock.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//! ├── .add/       # staged uploads
//! ├── .locks/     # advisory publish locks
//! ├── repodata/   # repomd.xml + primary/other/filelists catalogs
//! └── *.rpm       # published packages
//! ```

pub mod cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface.
#[derive(Debug, Parser)]
#[command(name = "rpmrepo")]
#[command(author, version, about = "rpmrepo - incremental RPM repository metadata")]
pub struct Cli {
    /// Repository root directory
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stage local RPM files and merge everything staged into the catalogs
    Add {
        /// RPM files to copy into the staging area first
        files: Vec<PathBuf>,
    },
    /// Remove packages from the repository
    Remove {
        /// Package keys relative to the root (e.g. `foo-1.0-1.x86_64.rpm`)
        #[arg(required_unless_present = "checksum")]
        keys: Vec<String>,
        /// Remove records by checksum, keeping the files
        #[arg(long)]
        checksum: Vec<String>,
    },
    /// Verify published catalogs agree with each other
    Check,
}
