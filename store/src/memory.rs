//! In-memory bucket
//!
//! Keeps objects in a sorted map and supports a few faults (unreachable bucket, failing puts
//! or gets for matching keys, slow or stalled transfers) so that replication behavior can be exercised
//! without a network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;

use crate::{Body, Connector, ListPage, ObjectEntry, ObjectReader, ObjectStore, TargetEndpoint};

/// Locks `mutex`, taking the guard over even if a previous holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reader that never produces data nor finishes
struct Stalled;

impl tokio::io::AsyncRead for Stalled {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: bytes::Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    failing_puts: Mutex<Vec<String>>,
    failing_gets: Mutex<Vec<String>>,
    stalling_gets: Mutex<Vec<String>>,
    delay: Mutex<Option<std::time::Duration>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    faults: Faults,
    page_size: usize,
    puts: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Faults::default(),
            page_size: 1000,
            puts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stores an object directly, bypassing faults and counters.
    pub fn insert(&self, key: &str, data: impl Into<bytes::Bytes>, content_type: &str) {
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Acquire)
    }

    /// Makes `head` (and every other call) fail as if the bucket did not exist.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::Release);
    }

    /// Fails every `put` whose key ends with `suffix`.
    pub fn fail_puts_ending_with(&self, suffix: &str) {
        lock(&self.faults.failing_puts).push(suffix.to_string());
    }

    /// Fails every `get` whose key ends with `suffix`.
    pub fn fail_gets_ending_with(&self, suffix: &str) {
        lock(&self.faults.failing_gets).push(suffix.to_string());
    }

    /// Makes every `get` whose key ends with `suffix` return the object's data and then hang.
    pub fn stall_gets_ending_with(&self, suffix: &str) {
        lock(&self.faults.stalling_gets).push(suffix.to_string());
    }

    /// Delays every `get` and `put` by `delay`.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *lock(&self.faults.delay) = Some(delay);
    }

    fn check_reachable(&self) -> anyhow::Result<()> {
        if self.faults.unreachable.load(Ordering::Acquire) {
            return Err(anyhow!("bucket is not reachable"));
        }
        Ok(())
    }

    fn matches_fault(list: &Mutex<Vec<String>>, key: &str) -> bool {
        lock(list)
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()))
    }

    async fn maybe_delay(&self) {
        let delay = *lock(&self.faults.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str, continuation: Option<String>) -> anyhow::Result<ListPage> {
        self.check_reachable()?;
        let objects = lock(&self.objects);
        let mut entries: Vec<ObjectEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| match &continuation {
                Some(after) => key.as_str() > after.as_str(),
                None => true,
            })
            .take(self.page_size + 1)
            .map(|(key, object)| ObjectEntry::new(key.clone(), object.data.len() as u64))
            .collect();
        let next = if entries.len() > self.page_size {
            entries.truncate(self.page_size);
            entries.last().map(|entry| entry.key.clone())
        } else {
            None
        };
        Ok(ListPage { entries, next })
    }

    async fn get(&self, key: &str) -> anyhow::Result<ObjectReader> {
        self.check_reachable()?;
        self.maybe_delay().await;
        if Self::matches_fault(&self.faults.failing_gets, key) {
            return Err(anyhow!("injected failure reading {:?}", key));
        }
        let object = self
            .object(key)
            .ok_or_else(|| anyhow!("no such key: {:?}", key))?;
        let reader = std::io::Cursor::new(object.data);
        if Self::matches_fault(&self.faults.stalling_gets, key) {
            return Ok(Box::pin(tokio::io::AsyncReadExt::chain(reader, Stalled)));
        }
        Ok(Box::pin(reader))
    }

    async fn put(&self, key: &str, body: Body, content_type: &str) -> anyhow::Result<()> {
        self.check_reachable()?;
        self.maybe_delay().await;
        if Self::matches_fault(&self.faults.failing_puts, key) {
            return Err(anyhow!("injected failure writing {:?}", key));
        }
        let data = body.into_bytes().await?;
        self.insert(key, data, content_type);
        self.puts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn head(&self) -> anyhow::Result<()> {
        self.check_reachable()
    }
}

/// Hands out pre-registered [`MemoryStore`]s by bucket name.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    buckets: Mutex<BTreeMap<String, Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store for `bucket`, creating it on first use.
    pub fn bucket(&self, bucket: &str) -> Arc<MemoryStore> {
        lock(&self.buckets)
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &TargetEndpoint) -> anyhow::Result<Arc<dyn ObjectStore>> {
        target.validate()?;
        Ok(self.bucket(&target.bucket))
    }
}
