//! Fixtures shared by the unit tests: in-memory descriptors and binary RPM images.

use rpmrepo_schema::{Checksum, Digest, Header, HeaderTag, TagValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

use crate::error::{MetadataError, Result};
use crate::rpm::{HEADER_MAGIC, LEAD_MAGIC, LEAD_SIZE, RpmPackage};
use crate::storage::{OpendalStorage, Storage};

/// A 64-character hex string made of `c`.
pub fn sha(c: char) -> String {
    std::iter::repeat_n(c, 64).collect()
}

/// `<name>-1.0-1.x86_64` descriptor with the given sha256 identity.
pub fn descriptor(name: &str, hex: &str) -> RpmPackage {
    let header = Header::new()
        .with(HeaderTag::Name, TagValue::Str(name.into()))
        .with(HeaderTag::Version, TagValue::Str("1.0".into()))
        .with(HeaderTag::Release, TagValue::Str("1".into()))
        .with(HeaderTag::Arch, TagValue::Str("x86_64".into()));
    let checksum = Checksum::new(Digest::Sha256, hex).unwrap();
    RpmPackage::new(header, 1024, checksum, format!("{name}-1.0-1.x86_64.rpm"))
}

fn header_bytes(header: &Header) -> Vec<u8> {
    let mut index = Vec::new();
    let mut store: Vec<u8> = Vec::new();
    for (tag, value) in header.iter() {
        let (kind, count) = match value {
            TagValue::Int(v) => {
                while store.len() % 4 != 0 {
                    store.push(0);
                }
                (4u32, v.len())
            }
            TagValue::Str(_) => (6, 1),
            TagValue::Bin(b) => (7, b.len()),
            TagValue::StrArray(v) => (8, v.len()),
        };
        let offset = store.len();
        match value {
            TagValue::Int(v) => {
                for n in v {
                    store.extend_from_slice(&(*n as u32).to_be_bytes());
                }
            }
            TagValue::Str(s) => {
                store.extend_from_slice(s.as_bytes());
                store.push(0);
            }
            TagValue::Bin(b) => store.extend_from_slice(b),
            TagValue::StrArray(v) => {
                for s in v {
                    store.extend_from_slice(s.as_bytes());
                    store.push(0);
                }
            }
        }
        for field in [tag, kind, offset as u32, count as u32] {
            index.extend_from_slice(&field.to_be_bytes());
        }
    }
    let mut out = HEADER_MAGIC.to_vec();
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&((index.len() / 16) as u32).to_be_bytes());
    out.extend_from_slice(&(store.len() as u32).to_be_bytes());
    out.extend(index);
    out.extend(store);
    out
}

/// Lead, a one-entry signature header (forcing alignment padding) and `header`.
pub fn rpm_image(header: &Header) -> Vec<u8> {
    let mut image = LEAD_MAGIC.to_vec();
    image.resize(LEAD_SIZE, 0);
    let signature = Header::new().with(HeaderTag::Name, TagValue::Int(vec![7]));
    image.extend(header_bytes(&signature));
    while image.len() % 8 != 0 {
        image.push(0);
    }
    image.extend(header_bytes(header));
    image
}

/// Image for a `<name>-1.0-1.x86_64` package; `salt` varies the digest.
pub fn package_image(name: &str, salt: &str) -> Vec<u8> {
    let header = Header::new()
        .with(HeaderTag::Name, TagValue::Str(name.into()))
        .with(HeaderTag::Version, TagValue::Str("1.0".into()))
        .with(HeaderTag::Release, TagValue::Str("1".into()))
        .with(HeaderTag::Arch, TagValue::Str("x86_64".into()))
        .with(HeaderTag::Summary, TagValue::Str(salt.into()))
        .with(
            HeaderTag::BaseNames,
            TagValue::StrArray(vec![name.into(), ".keep".into()]),
        )
        .with(HeaderTag::DirNames, TagValue::StrArray(vec!["/usr/bin/".into()]))
        .with(HeaderTag::DirIndexes, TagValue::Int(vec![0, 0]));
    rpm_image(&header)
}

/// Count `<package` start tags in a document.
pub fn record_count(xml: &str) -> usize {
    xml.matches("<package ").count() + xml.matches("<package>").count()
}

/// Every key and value in `storage`.
pub async fn dump(storage: &dyn Storage) -> BTreeMap<String, Vec<u8>> {
    let mut all = BTreeMap::new();
    for key in storage.list("").await.unwrap() {
        let value = storage.get(&key).await.unwrap();
        all.insert(key, value);
    }
    all
}

/// Pause point: the first `put` of a key ending in `suffix` signals `reached`
/// and waits for `resume`.
struct Gate {
    suffix: String,
    armed: AtomicBool,
    reached: Arc<Notify>,
    resume: Arc<Notify>,
}

/// Storage wrapper that can yield between operations, fail a chosen move,
/// or pause on a chosen write.
pub struct TestStorage {
    inner: Arc<dyn Storage>,
    yielding: bool,
    fail_move_at: Option<usize>,
    moves: AtomicUsize,
    gate: Option<Gate>,
}

impl TestStorage {
    pub fn new() -> Self {
        Self::over(Arc::new(OpendalStorage::memory().unwrap()))
    }

    pub fn over(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            yielding: false,
            fail_move_at: None,
            moves: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Yield to the scheduler before every operation.
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Fail the `n`th call to `move_key` (1-based) without touching anything.
    pub fn fail_move(mut self, n: usize) -> Self {
        self.fail_move_at = Some(n);
        self
    }

    pub fn gate_put(mut self, suffix: &str, reached: Arc<Notify>, resume: Arc<Notify>) -> Self {
        self.gate = Some(Gate {
            suffix: suffix.to_string(),
            armed: AtomicBool::new(true),
            reached,
            resume,
        });
        self
    }

    async fn step(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl Storage for TestStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.step().await;
        self.inner.list(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.step().await;
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.step().await;
        self.inner.get(key).await
    }

    async fn get_if_exists(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.step().await;
        self.inner.get_if_exists(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.step().await;
        if let Some(gate) = &self.gate {
            if key.ends_with(&gate.suffix) && gate.armed.swap(false, Ordering::SeqCst) {
                gate.reached.notify_one();
                gate.resume.notified().await;
            }
        }
        self.inner.put(key, data).await
    }

    async fn put_if_absent(&self, key: &str, data: Vec<u8>) -> Result<bool> {
        self.step().await;
        self.inner.put_if_absent(key, data).await
    }

    async fn replace_if(&self, key: &str, expected: &[u8], data: Vec<u8>) -> Result<bool> {
        self.step().await;
        self.inner.replace_if(key, expected, data).await
    }

    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.step().await;
        self.inner.delete_if(key, expected).await
    }

    async fn move_key(&self, src: &str, dst: &str) -> Result<()> {
        self.step().await;
        let n = self.moves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_move_at == Some(n) {
            return Err(MetadataError::Io(std::io::Error::other(format!(
                "injected failure moving {src} to {dst}"
            ))));
        }
        self.inner.move_key(src, dst).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.step().await;
        self.inner.delete(key).await
    }
}
