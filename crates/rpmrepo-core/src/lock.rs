//! Advisory lock stored as a key next to the data it guards.
//!
//! The lock key holds `<token>@<rfc3339 timestamp>` and is created with
//! [`Storage::put_if_absent`], so at most one caller holds it. A lock older
//! than its ttl is considered abandoned and is taken over with
//! [`Storage::replace_if`] against the exact stamp that was judged stale.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{MetadataError, Result};
use crate::storage::Storage;

const LOCK_PREFIX: &str = ".locks";

pub struct StorageLock {
    storage: Arc<dyn Storage>,
    scope: String,
}

impl StorageLock {
    pub fn new(storage: Arc<dyn Storage>, scope: &str) -> Self {
        Self {
            storage,
            scope: scope.trim_matches('/').to_string(),
        }
    }

    fn key(&self) -> String {
        format!("{LOCK_PREFIX}/{}", self.scope)
    }

    /// Acquire the lock, retrying with a fixed delay while another owner holds it.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::LockUnavailable`] once `config.retries` attempts
    /// are exhausted, or a storage error.
    pub async fn acquire(&self, config: &LockConfig) -> Result<LockGuard> {
        let key = self.key();
        let token = format!("{:016x}", rand::random::<u64>());
        let attempts = config.retries.max(1);
        for attempt in 1..=attempts {
            let stamp = format!("{token}@{}", Utc::now().to_rfc3339()).into_bytes();
            if self.storage.put_if_absent(&key, stamp.clone()).await? {
                debug!(scope = %self.scope, attempt, "lock acquired");
                return Ok(self.guard(key, stamp));
            }

            match self.storage.get_if_exists(&key).await? {
                // Released in between; try again right away.
                None => continue,
                Some(current) if is_stale(&String::from_utf8_lossy(&current), config) => {
                    if self.storage.replace_if(&key, &current, stamp.clone()).await? {
                        warn!(
                            scope = %self.scope,
                            holder = %String::from_utf8_lossy(&current),
                            "took over stale lock"
                        );
                        return Ok(self.guard(key, stamp));
                    }
                    debug!(scope = %self.scope, attempt, "stale lock claimed by another owner");
                }
                Some(_) => debug!(scope = %self.scope, attempt, "lock held, waiting"),
            }
            tokio::time::sleep(config.retry_delay()).await;
        }
        Err(MetadataError::LockUnavailable {
            scope: self.scope.clone(),
            attempts,
        })
    }

    fn guard(&self, key: String, stamp: Vec<u8>) -> LockGuard {
        LockGuard {
            storage: Arc::clone(&self.storage),
            key,
            stamp,
        }
    }
}

/// Unparseable stamps count as stale.
fn is_stale(stamp: &str, config: &LockConfig) -> bool {
    let Some((_, at)) = stamp.split_once('@') else {
        return true;
    };
    match DateTime::parse_from_rfc3339(at.trim()) {
        Ok(at) => {
            let age = Utc::now().signed_duration_since(at.with_timezone(&Utc));
            age.to_std().is_ok_and(|age| age > config.ttl())
        }
        Err(_) => true,
    }
}

/// Held lock; call [`LockGuard::release`] when done.
pub struct LockGuard {
    storage: Arc<dyn Storage>,
    key: String,
    stamp: Vec<u8>,
}

impl LockGuard {
    /// Delete the lock key if it still carries this guard's stamp.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn release(self) -> Result<()> {
        if !self.storage.delete_if(&self.key, &self.stamp).await? {
            warn!(key = %self.key, "lock vanished or was taken over, leaving it");
        }
        Ok(())
    }
}
