//! Single-object transfers
//!
//! One call moves one object, once. Retrying is left to whoever re-submits the run.

use anyhow::{Context, anyhow};
use store::{Body, ObjectStore};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::content_type;
use crate::error::Error;
use crate::progress::Progress;
use crate::task::{Locator, Outcome, TransferResult, TransferTask};

async fn discard_partial(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("removed partial file {:?}", path),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::debug!("failed removing partial file {:?}: {}", path, error),
    }
}

#[instrument(skip(store))]
async fn download(
    store: &dyn ObjectStore,
    key: &str,
    path: &std::path::Path,
) -> anyhow::Result<u64> {
    let mut reader = store.get(key).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create directory {:?}", parent))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("cannot open {:?} for writing", path))?;
    let copied = async {
        let bytes = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok::<u64, std::io::Error>(bytes)
    }
    .await;
    match copied {
        Ok(bytes) => Ok(bytes),
        Err(error) => {
            drop(file);
            discard_partial(path).await;
            Err(anyhow::Error::new(error)
                .context(format!("failed writing {:?} from key {:?}", path, key)))
        }
    }
}

#[instrument(skip(store))]
async fn upload(
    store: &dyn ObjectStore,
    path: &std::path::Path,
    key: &str,
) -> anyhow::Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot open {:?} for reading", path))?;
    let content_type = content_type::for_path(path);
    store
        .put(key, Body::File(path.to_path_buf()), content_type)
        .await
        .with_context(|| format!("failed uploading {:?} as {:?}", path, key))?;
    Ok(metadata.len())
}

async fn run(store: &dyn ObjectStore, task: &TransferTask) -> anyhow::Result<u64> {
    match (&task.source, &task.destination) {
        (Locator::Remote(key), Locator::Local(path)) => download(store, key, path).await,
        (Locator::Local(path), Locator::Remote(key)) => upload(store, path, key).await,
        (source, destination) => Err(anyhow!(
            "unsupported transfer from {} to {}",
            source,
            destination
        )),
    }
}

/// Moves the object described by `task`, bounded by `timeout` when given.
pub async fn transfer(
    store: &dyn ObjectStore,
    task: TransferTask,
    timeout: Option<std::time::Duration>,
    progress: &Progress,
) -> TransferResult {
    let _ops_guard = progress.ops.guard();
    let result = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, run(store, &task)).await {
            Ok(result) => result,
            Err(_) => {
                // the download was dropped mid-copy
                if let (Locator::Remote(_), Locator::Local(path)) =
                    (&task.source, &task.destination)
                {
                    discard_partial(path).await;
                }
                Err(anyhow!("transfer did not finish within {:?}", timeout))
            }
        },
        None => run(store, &task).await,
    };
    let outcome = match result {
        Ok(bytes) => {
            tracing::debug!("transferred {} ({} bytes)", &task.relative_path, bytes);
            progress.bytes_transferred.add(bytes);
            match task.destination {
                Locator::Local(_) => progress.objects_downloaded.inc(),
                Locator::Remote(_) => progress.objects_uploaded.inc(),
            }
            Outcome::Success { bytes }
        }
        Err(error) => {
            let error = Error::transfer(&task.relative_path, error);
            tracing::error!("{:#}", &error);
            progress.transfers_failed.inc();
            Outcome::Failure(error)
        }
    };
    TransferResult { task, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::memory::MemoryStore;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn download_creates_parents_and_overwrites() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = MemoryStore::new();
        store.insert("movie/stream_0/data000.ts", "new", "video/mp2t");
        let path = tmp.path().join("movie").join("stream_0").join("data000.ts");
        tokio::fs::create_dir_all(path.parent().unwrap()).await?;
        tokio::fs::write(&path, "previous longer contents").await?;
        let progress = Progress::new();
        let task = TransferTask {
            relative_path: "stream_0/data000.ts".to_string(),
            source: Locator::Remote("movie/stream_0/data000.ts".to_string()),
            destination: Locator::Local(path.clone()),
        };
        let result = transfer(&store, task, None, &progress).await;
        assert!(matches!(result.outcome, Outcome::Success { bytes: 3 }));
        assert_eq!(tokio::fs::read_to_string(&path).await?, "new");
        assert_eq!(progress.objects_downloaded.get(), 1);
        assert_eq!(progress.bytes_transferred.get(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn upload_sets_content_type() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("index.m3u8");
        tokio::fs::write(&path, "#EXTM3U").await?;
        let store = MemoryStore::new();
        let progress = Progress::new();
        let task = TransferTask {
            relative_path: "index.m3u8".to_string(),
            source: Locator::Local(path),
            destination: Locator::Remote("movie/index.m3u8".to_string()),
        };
        let result = transfer(&store, task, None, &progress).await;
        assert!(result.is_success());
        let object = store.object("movie/index.m3u8").unwrap();
        assert_eq!(object.content_type, "application/vnd.apple.mpegurl");
        assert_eq!(object.data.as_ref(), b"#EXTM3U");
        assert_eq!(progress.objects_uploaded.get(), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_names_the_object() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let progress = Progress::new();
        let task = TransferTask {
            relative_path: "missing.ts".to_string(),
            source: Locator::Remote("movie/missing.ts".to_string()),
            destination: Locator::Local(std::path::PathBuf::from("/nonexistent/missing.ts")),
        };
        let result = transfer(&store, task, None, &progress).await;
        match result.outcome {
            Outcome::Failure(error) => {
                assert!(matches!(error, Error::Transfer { .. }));
                assert!(error.to_string().contains("missing.ts"));
            }
            Outcome::Success { .. } => panic!("expected the transfer to fail"),
        }
        assert_eq!(progress.transfers_failed.get(), 1);
        assert!(logs_contain("missing.ts"));
        Ok(())
    }

    #[tokio::test]
    async fn same_kind_locators_are_unsupported() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let progress = Progress::new();
        let task = crate::testutils::fixed_tasks(1).remove(0);
        let result = transfer(&store, task, None, &progress).await;
        match result.outcome {
            Outcome::Failure(error) => assert!(error.to_string().contains("unsupported")),
            Outcome::Success { .. } => panic!("expected the transfer to fail"),
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_the_transfer() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = MemoryStore::new();
        store.insert("slow.ts", "x", "video/mp2t");
        store.set_delay(std::time::Duration::from_secs(10));
        let progress = Progress::new();
        let task = TransferTask {
            relative_path: "slow.ts".to_string(),
            source: Locator::Remote("slow.ts".to_string()),
            destination: Locator::Local(tmp.path().join("slow.ts")),
        };
        let result = transfer(
            &store,
            task,
            Some(std::time::Duration::from_secs(1)),
            &progress,
        )
        .await;
        match result.outcome {
            Outcome::Failure(error) => assert!(error.to_string().contains("did not finish")),
            Outcome::Success { .. } => panic!("expected the transfer to time out"),
        }
        assert_eq!(progress.ops.get().finished, 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn timed_out_download_leaves_no_partial_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("stream_0").join("data000.ts");
        tokio::fs::create_dir_all(path.parent().unwrap()).await?;
        tokio::fs::write(&path, "stale contents").await?;
        let store = MemoryStore::new();
        store.insert("movie/stream_0/data000.ts", "first half", "video/mp2t");
        store.stall_gets_ending_with("data000.ts");
        let progress = Progress::new();
        let task = TransferTask {
            relative_path: "stream_0/data000.ts".to_string(),
            source: Locator::Remote("movie/stream_0/data000.ts".to_string()),
            destination: Locator::Local(path.clone()),
        };
        let result = transfer(
            &store,
            task,
            Some(std::time::Duration::from_millis(200)),
            &progress,
        )
        .await;
        match result.outcome {
            Outcome::Failure(error) => assert!(error.to_string().contains("did not finish")),
            Outcome::Success { .. } => panic!("expected the transfer to time out"),
        }
        assert!(!path.exists());
        assert_eq!(progress.transfers_failed.get(), 1);
        Ok(())
    }
}
