//! Result blob storage. Workers write one gzip-compressed envelope per unit
//! under `{job_id}/`; listings come back in key order, one page at a time.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Component, Path, PathBuf};

use crate::error::BlobError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a listing. When `truncated` is set, pass `next_marker` to
/// fetch the following page.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub objects: Vec<ObjectSummary>,
    pub truncated: bool,
    pub next_marker: Option<String>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys under `prefix` strictly after `marker`, in lexicographic order.
    async fn list(&self, prefix: &str, marker: Option<&str>) -> Result<Listing, BlobError>;
    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;
}

fn page<I>(keys: I, page_size: usize) -> Listing
where
    I: Iterator<Item = ObjectSummary>,
{
    let mut objects: Vec<ObjectSummary> = keys.take(page_size + 1).collect();
    let truncated = objects.len() > page_size;
    objects.truncate(page_size);
    let next_marker = if truncated {
        objects.last().map(|o| o.key.clone())
    } else {
        None
    };
    Listing {
        objects,
        truncated,
        next_marker,
    }
}

/// Blob store backed by a directory tree; keys are `/`-separated paths
/// relative to the root.
pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            root: root.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(BlobError::Backend(format!("invalid object key `{key}`")));
        }
        Ok(self.root.join(rel))
    }

    /// Deepest directory that holds every key under `prefix`.
    fn scan_dir(root: &Path, prefix: &str) -> PathBuf {
        let Some((dir, _)) = prefix.rsplit_once('/') else {
            return root.to_path_buf();
        };
        let rel = Path::new(dir);
        if dir.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return root.to_path_buf();
        }
        root.join(rel)
    }

    fn scan(root: &Path, prefix: &str, marker: Option<&str>) -> Result<Vec<ObjectSummary>, BlobError> {
        let start = Self::scan_dir(root, prefix);
        if !start.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&start).follow_links(false) {
            let entry = entry.map_err(|e| BlobError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) || marker.is_some_and(|m| key.as_str() <= m) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(ObjectSummary { key, size });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str, marker: Option<&str>) -> Result<Listing, BlobError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let marker = marker.map(str::to_string);
        let keys = tokio::task::spawn_blocking(move || Self::scan(&root, &prefix, marker.as_deref()))
            .await
            .map_err(|e| BlobError::Backend(format!("join error: {e}")))??;
        Ok(page(keys.into_iter(), self.page_size))
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process blob store with the same paging semantics.
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    page_size: usize,
}

impl MemoryBlobStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), data.into());
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str, marker: Option<&str>) -> Result<Listing, BlobError> {
        let objects = self.objects.read();
        let start = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let keys = objects
            .range((start, Bound::Unbounded))
            .skip_while(|(k, _)| !k.starts_with(prefix) && k.as_str() < prefix)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectSummary {
                key: k.clone(),
                size: v.len() as u64,
            });
        Ok(page(keys, self.page_size))
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}
