//! Key-value object storage consumed by the workflows.

use nix::fcntl::{Flock, FlockArg};
use opendal::{ErrorKind, Operator, services};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::TMP_PREFIX;
use crate::error::Result;

/// Flat key space; `/` separated keys, listing is recursive.
///
/// The conditional operations (`put_if_absent`, `replace_if`, `delete_if`)
/// are atomic with respect to each other across every user of the store.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Every key under `prefix`, sorted. A missing prefix lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Like [`Storage::get`], with a missing key as `None`.
    async fn get_if_exists(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `key`, replacing it atomically: readers see the old or the new value.
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Create `key` only if it does not exist. Returns whether it was written.
    async fn put_if_absent(&self, key: &str, data: Vec<u8>) -> Result<bool>;

    /// Replace `key` only while it still holds `expected`.
    async fn replace_if(&self, key: &str, expected: &[u8], data: Vec<u8>) -> Result<bool>;

    /// Delete `key` only while it still holds `expected`.
    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Move `src` to `dst`, replacing `dst`.
    async fn move_key(&self, src: &str, dst: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// File serialising conditional operations between processes sharing a root.
const GUARD_FILE: &str = ".locks/.cas";

/// [`Storage`] over an `opendal` operator.
///
/// Conditional operations hold a process-wide mutex and, for filesystem
/// roots, an exclusive `flock` on [`GUARD_FILE`] so that separate processes
/// are serialised as well.
#[derive(Debug, Clone)]
pub struct OpendalStorage {
    op: Operator,
    root: Option<PathBuf>,
    cas: Arc<Mutex<()>>,
}

/// Held for the duration of one conditional operation.
struct Exclusive {
    _local: OwnedMutexGuard<()>,
    _file: Option<Flock<File>>,
}

fn lock_file(path: &Path) -> io::Result<Flock<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))
}

impl OpendalStorage {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            root: None,
            cas: Arc::new(Mutex::new(())),
        }
    }

    /// Process-local storage, used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be built.
    pub fn memory() -> Result<Self> {
        let builder = services::Memory::default();
        Ok(Self::new(Operator::new(builder)?.finish()))
    }

    /// Storage rooted at a local directory.
    ///
    /// Writes go through a scratch directory under the root and are renamed
    /// into place, so a reader never sees a partially written key.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be built.
    pub fn fs(root: &Path) -> Result<Self> {
        let mut builder = services::Fs::default();
        builder.root(&root.to_string_lossy());
        builder.atomic_write_dir(&root.join(TMP_PREFIX).join(".writes").to_string_lossy());
        Ok(Self {
            root: Some(root.to_path_buf()),
            ..Self::new(Operator::new(builder)?.finish())
        })
    }

    async fn exclusive(&self) -> Result<Exclusive> {
        let local = Arc::clone(&self.cas).lock_owned().await;
        let file = match &self.root {
            Some(root) => {
                let path = root.join(GUARD_FILE);
                Some(tokio::task::spawn_blocking(move || lock_file(&path)).await??)
            }
            None => None,
        };
        Ok(Exclusive {
            _local: local,
            _file: file,
        })
    }
}

#[async_trait::async_trait]
impl Storage for OpendalStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![format!("{}/", prefix.trim_end_matches('/'))];
        while let Some(dir) = pending.pop() {
            let entries = match self.op.list(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry.path();
                if path == dir {
                    continue;
                }
                if path.ends_with('/') {
                    pending.push(path.to_string());
                } else {
                    keys.push(path.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.op.is_exist(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.op.read(key).await?)
    }

    async fn get_if_exists(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.op.read(key).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.op.write(key, data).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Vec<u8>) -> Result<bool> {
        let _guard = self.exclusive().await?;
        if self.op.is_exist(key).await? {
            return Ok(false);
        }
        self.op.write(key, data).await?;
        Ok(true)
    }

    async fn replace_if(&self, key: &str, expected: &[u8], data: Vec<u8>) -> Result<bool> {
        let _guard = self.exclusive().await?;
        if self.get_if_exists(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.op.write(key, data).await?;
        Ok(true)
    }

    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let _guard = self.exclusive().await?;
        if self.get_if_exists(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.op.delete(key).await?;
        Ok(true)
    }

    /// Copy then delete. When the delete fails, a `dst` created by this call
    /// is removed again before the error is returned.
    async fn move_key(&self, src: &str, dst: &str) -> Result<()> {
        let data = self.op.read(src).await?;
        let existed = self.op.is_exist(dst).await?;
        self.op.write(dst, data).await?;
        if let Err(e) = self.op.delete(src).await {
            if !existed {
                if let Err(cleanup) = self.op.delete(dst).await {
                    warn!(%dst, error = %cleanup, "could not remove half-moved key");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.op.delete(key).await?;
        Ok(())
    }
}
