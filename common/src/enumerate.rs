//! Lazy sources of transfer tasks
//!
//! A [`TaskSource`] hands out one [`TransferTask`] at a time and is consumed once. Remote
//! listings are fetched page by page only when the buffered page runs out, local trees are
//! walked one directory handle at a time, so memory stays proportional to a page or to the
//! directory depth rather than to the size of the tree.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use store::{ObjectEntry, ObjectStore};
use tracing::instrument;

use crate::error::Error;
use crate::task::{Destination, Locator, TransferTask, dir_prefix};

#[async_trait::async_trait]
pub trait TaskSource: Send {
    /// Returns the next task, `None` once the source is exhausted. After an error the source
    /// yields nothing further.
    async fn next_task(&mut self) -> Result<Option<TransferTask>, Error>;
}

#[async_trait::async_trait]
impl TaskSource for std::vec::IntoIter<TransferTask> {
    async fn next_task(&mut self) -> Result<Option<TransferTask>, Error> {
        Ok(self.next())
    }
}

fn check_relative_path(relative_path: &str) -> anyhow::Result<()> {
    if relative_path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(anyhow!(
            "object key resolves to unsafe relative path {:?}",
            relative_path
        ));
    }
    Ok(())
}

/// Paginated listing of every object under a prefix
#[derive(Debug)]
pub struct RemoteEnumerator {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    destination: Destination,
    buffered: VecDeque<ObjectEntry>,
    continuation: Option<String>,
    exhausted: bool,
    seen: HashSet<String>,
}

impl RemoteEnumerator {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, destination: Destination) -> Self {
        Self {
            store,
            prefix: dir_prefix(prefix),
            destination,
            buffered: VecDeque::new(),
            continuation: None,
            exhausted: false,
            seen: HashSet::new(),
        }
    }

    fn fail(&mut self, source: anyhow::Error) -> Error {
        self.exhausted = true;
        self.buffered.clear();
        Error::enumeration(format!("prefix {:?}", &self.prefix), source)
    }

    fn task_for(&mut self, entry: ObjectEntry) -> Result<Option<TransferTask>, Error> {
        if entry.is_directory_marker {
            tracing::debug!("skipping directory marker {:?}", &entry.key);
            return Ok(None);
        }
        let Some(relative_path) = entry.key.strip_prefix(self.prefix.as_str()) else {
            tracing::debug!("skipping {:?} listed outside of {:?}", &entry.key, &self.prefix);
            return Ok(None);
        };
        let relative_path = relative_path.trim_start_matches('/');
        if relative_path.is_empty() {
            return Ok(None);
        }
        if let Err(error) = check_relative_path(relative_path) {
            return Err(self.fail(error));
        }
        if !self.seen.insert(relative_path.to_string()) {
            tracing::debug!("skipping duplicate listing of {:?}", &entry.key);
            return Ok(None);
        }
        Ok(Some(TransferTask {
            relative_path: relative_path.to_string(),
            destination: self.destination.locate(relative_path),
            source: Locator::Remote(entry.key),
        }))
    }
}

#[async_trait::async_trait]
impl TaskSource for RemoteEnumerator {
    #[instrument(skip(self), fields(prefix = %self.prefix))]
    async fn next_task(&mut self) -> Result<Option<TransferTask>, Error> {
        loop {
            while let Some(entry) = self.buffered.pop_front() {
                if let Some(task) = self.task_for(entry)? {
                    return Ok(Some(task));
                }
            }
            if self.exhausted {
                return Ok(None);
            }
            let continuation = self.continuation.take();
            let page = match self.store.list(&self.prefix, continuation.clone()).await {
                Ok(page) => page,
                Err(error) => return Err(self.fail(error)),
            };
            tracing::debug!(
                "listed {} entries, more pages: {}",
                page.entries.len(),
                page.next.is_some()
            );
            if page.next.is_some() && page.next == continuation {
                let error = anyhow!("listing returned the same continuation token twice");
                return Err(self.fail(error));
            }
            self.exhausted = page.next.is_none();
            self.continuation = page.next;
            self.buffered.extend(page.entries);
        }
    }
}

/// Depth-first walk of the regular files under a local directory
#[derive(Debug)]
pub struct LocalEnumerator {
    root: std::path::PathBuf,
    destination: Destination,
    // directories still to open, with the relative path prefix of their entries
    pending: Vec<(std::path::PathBuf, String)>,
    current: Option<(tokio::fs::ReadDir, std::path::PathBuf, String)>,
    failed: bool,
}

impl LocalEnumerator {
    pub fn new(root: impl Into<std::path::PathBuf>, destination: Destination) -> Self {
        let root = root.into();
        Self {
            pending: vec![(root.clone(), String::new())],
            root,
            destination,
            current: None,
            failed: false,
        }
    }

    fn fail(&mut self, source: anyhow::Error) -> Error {
        self.failed = true;
        self.pending.clear();
        self.current = None;
        Error::enumeration(self.root.display(), source)
    }

    async fn next_entry(&mut self) -> anyhow::Result<Option<TransferTask>> {
        loop {
            let Some((read_dir, dir, prefix)) = self.current.as_mut() else {
                let Some((dir, prefix)) = self.pending.pop() else {
                    return Ok(None);
                };
                let read_dir = tokio::fs::read_dir(&dir)
                    .await
                    .with_context(|| format!("cannot open directory {:?} for reading", &dir))?;
                self.current = Some((read_dir, dir, prefix));
                continue;
            };
            let Some(entry) = read_dir
                .next_entry()
                .await
                .with_context(|| format!("failed traversing directory {:?}", &dir))?
            else {
                self.current = None;
                continue;
            };
            let path = entry.path();
            let name = entry.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| anyhow!("non UTF-8 file name {:?}", &path))?;
            let relative_path = format!("{prefix}{name}");
            let mut file_type = entry
                .file_type()
                .await
                .with_context(|| format!("failed reading file type of {:?}", &path))?;
            if file_type.is_symlink() {
                file_type = tokio::fs::metadata(&path)
                    .await
                    .with_context(|| format!("failed resolving symlink {:?}", &path))?
                    .file_type();
                if file_type.is_dir() {
                    tracing::debug!("not following directory symlink {:?}", &path);
                    continue;
                }
            }
            if file_type.is_dir() {
                self.pending.push((path, format!("{relative_path}/")));
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!("skipping special file {:?}", &path);
                continue;
            }
            return Ok(Some(TransferTask {
                destination: self.destination.locate(&relative_path),
                source: Locator::Local(path),
                relative_path,
            }));
        }
    }
}

#[async_trait::async_trait]
impl TaskSource for LocalEnumerator {
    #[instrument(skip(self), fields(root = ?self.root))]
    async fn next_task(&mut self) -> Result<Option<TransferTask>, Error> {
        if self.failed {
            return Ok(None);
        }
        match self.next_entry().await {
            Ok(task) => Ok(task),
            Err(error) => Err(self.fail(error)),
        }
    }
}
