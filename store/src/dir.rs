//! Local directory acting as a bucket
//!
//! Object keys map to paths under the bucket root, `/` separated. Listing walks the tree and
//! returns keys in sorted order, paginated the same way a remote listing would be.
//!
//! A directory has nowhere to keep per-object metadata, so content types passed to `put` are
//! dropped: only the object bytes are stored.

use anyhow::{Context, anyhow};
use tracing::instrument;

use crate::{Body, ListPage, ObjectEntry, ObjectReader, ObjectStore};

const PAGE_SIZE: usize = 1000;

/// Bucket backed by a local directory, see the module docs for what it does not keep
#[derive(Debug, Clone)]
pub struct DirStore {
    root: std::path::PathBuf,
    page_size: usize,
}

impl DirStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> anyhow::Result<std::path::PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(anyhow!("key {:?} cannot be stored in a directory bucket", key));
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn all_keys(&self) -> anyhow::Result<Vec<ObjectEntry>> {
        let mut entries = vec![];
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .with_context(|| format!("failed traversing directory {:?}", &dir))?
            {
                let name = entry.file_name();
                let name = name
                    .to_str()
                    .ok_or_else(|| anyhow!("non UTF-8 file name in {:?}", &dir))?;
                let key = format!("{key_prefix}{name}");
                let file_type = entry
                    .file_type()
                    .await
                    .with_context(|| format!("failed reading file type of {:?}", entry.path()))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else {
                    let metadata = entry
                        .metadata()
                        .await
                        .with_context(|| format!("failed reading metadata of {:?}", entry.path()))?;
                    entries.push(ObjectEntry::new(key, metadata.len()));
                }
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl ObjectStore for DirStore {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str, continuation: Option<String>) -> anyhow::Result<ListPage> {
        let mut entries: Vec<ObjectEntry> = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|entry| entry.key.starts_with(prefix))
            .filter(|entry| match &continuation {
                Some(after) => entry.key.as_str() > after.as_str(),
                None => true,
            })
            .take(self.page_size + 1)
            .collect();
        let next = if entries.len() > self.page_size {
            entries.truncate(self.page_size);
            entries.last().map(|entry| entry.key.clone())
        } else {
            None
        };
        Ok(ListPage { entries, next })
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<ObjectReader> {
        let path = self.key_path(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed opening {:?} for reading", &path))?;
        Ok(Box::pin(file))
    }

    /// Writes the object bytes, `content_type` is only logged
    #[instrument(skip(self, body))]
    async fn put(&self, key: &str, body: Body, content_type: &str) -> anyhow::Result<()> {
        let path = self.key_path(key)?;
        tracing::trace!("not recording content type {:?} of {:?}", content_type, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory {parent:?}"))?;
        }
        match body {
            Body::File(src) => {
                tokio::fs::copy(&src, &path)
                    .await
                    .with_context(|| format!("failed copying {:?} to {:?}", &src, &path))?;
            }
            Body::Bytes(bytes) => {
                tokio::fs::write(&path, &bytes)
                    .await
                    .with_context(|| format!("failed writing {:?}", &path))?;
            }
        }
        Ok(())
    }

    async fn head(&self) -> anyhow::Result<()> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("bucket directory {:?} is not accessible", &self.root))?;
        if !metadata.is_dir() {
            return Err(anyhow!("bucket path {:?} is not a directory", &self.root));
        }
        Ok(())
    }
}
