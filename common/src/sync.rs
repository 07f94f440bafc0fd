//! One full tree, one source, one destination

use std::sync::Arc;

use anyhow::{Context, anyhow};
use store::{ObjectStore, TargetEndpoint};
use tracing::instrument;

use crate::config::Settings;
use crate::enumerate::{LocalEnumerator, RemoteEnumerator, TaskSource};
use crate::error::Error;
use crate::progress::Progress;
use crate::scheduler;
use crate::task::{Destination, last_segment};
use crate::transfer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// every object under `prefix` lands in `into/<last segment of prefix>`
    Download {
        prefix: String,
        into: std::path::PathBuf,
    },
    /// every file under `from` is stored under `prefix`
    Upload {
        from: std::path::PathBuf,
        prefix: String,
    },
}

impl Direction {
    /// Local directory a download writes into.
    pub fn download_root(prefix: &str, into: &std::path::Path) -> std::path::PathBuf {
        match last_segment(prefix) {
            "" => into.to_path_buf(),
            segment => into.join(segment),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetEndpoint>,
    pub attempted: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn from_error(error: &Error) -> Self {
        tracing::error!("{:#}", error);
        Self {
            target: None,
            attempted: 0,
            failed: 1,
            first_error: Some(format!("{error:#}")),
        }
    }
}

impl std::ops::Add for SyncReport {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            target: self.target.or(other.target),
            attempted: self.attempted + other.attempted,
            failed: self.failed + other.failed,
            first_error: self.first_error.or(other.first_error),
        }
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(target) = &self.target {
            writeln!(f, "target: {target}")?;
        }
        write!(
            f,
            "transfers attempted: {}\n\
            transfers failed: {}",
            self.attempted, self.failed
        )?;
        if let Some(error) = &self.first_error {
            write!(f, "\nfirst error: {error}")?;
        }
        Ok(())
    }
}

async fn prepare_download_root(prefix: &str, root: &std::path::Path) -> anyhow::Result<()> {
    if matches!(last_segment(prefix), "." | "..") {
        return Err(anyhow!("prefix {:?} does not name a directory", prefix));
    }
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("cannot create directory {:?}", root))
}

/// Moves one tree in the given direction, never returning a bare error: every failure ends up
/// in the report.
#[instrument(skip(store, progress))]
pub async fn sync_tree(
    store: Arc<dyn ObjectStore>,
    direction: &Direction,
    settings: &Settings,
    progress: &Arc<Progress>,
) -> SyncReport {
    let concurrency = match settings.concurrency() {
        Ok(concurrency) => concurrency,
        Err(reason) => return SyncReport::from_error(&Error::configuration(anyhow!(reason))),
    };
    let mut source: Box<dyn TaskSource> = match direction {
        Direction::Download { prefix, into } => {
            let root = Direction::download_root(prefix, into);
            if let Err(error) = prepare_download_root(prefix, &root).await {
                return SyncReport::from_error(&Error::Destination {
                    location: root.display().to_string(),
                    source: error,
                });
            }
            tracing::info!("downloading prefix {:?} into {:?}", prefix, &root);
            Box::new(RemoteEnumerator::new(
                store.clone(),
                prefix,
                Destination::LocalDir(root),
            ))
        }
        Direction::Upload { from, prefix } => {
            tracing::info!("uploading {:?} under prefix {:?}", from, prefix);
            Box::new(LocalEnumerator::new(
                from,
                Destination::Prefix(prefix.clone()),
            ))
        }
    };
    let timeout = settings.transfer_timeout;
    let tally = scheduler::run(
        source.as_mut(),
        concurrency,
        settings.ops_throttle,
        |task| {
            let store = store.clone();
            let progress = progress.clone();
            async move { transfer::transfer(store.as_ref(), task, timeout, &progress).await }
        },
    )
    .await;
    let report = SyncReport {
        target: None,
        attempted: tally.attempted,
        failed: tally.failed,
        first_error: tally.first_error,
    };
    if report.is_success() {
        tracing::info!("sync finished: {} object(s)", report.attempted);
    } else {
        tracing::error!(
            "sync finished with {} failure(s) out of {} attempted",
            report.failed,
            report.attempted
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use store::memory::MemoryStore;
    use tracing_test::traced_test;

    fn seeded_origin() -> Arc<MemoryStore> {
        let origin = Arc::new(MemoryStore::new().with_page_size(2));
        origin.insert("movie/", "", "application/octet-stream");
        origin.insert("movie/a/b.ts", "segment", "video/mp2t");
        origin.insert("movie/c.m3u8", "#EXTM3U", "application/vnd.apple.mpegurl");
        origin.insert("other/d.ts", "unrelated", "video/mp2t");
        origin
    }

    #[test]
    fn download_root_uses_last_segment() {
        let into = std::path::Path::new("/tmp/downloads");
        assert_eq!(
            Direction::download_root("videos/suit-yourself/", into),
            into.join("suit-yourself")
        );
        assert_eq!(Direction::download_root("", into), into.to_path_buf());
    }

    #[tokio::test]
    #[traced_test]
    async fn download_then_upload_round_trip() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let progress = Arc::new(Progress::new());
        let settings = Settings::default();
        let download = Direction::Download {
            prefix: "movie".to_string(),
            into: tmp.path().to_path_buf(),
        };
        let report = sync_tree(seeded_origin(), &download, &settings, &progress).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 0);
        let root = tmp.path().join("movie");
        assert_eq!(
            tokio::fs::read_to_string(root.join("a").join("b.ts")).await?,
            "segment"
        );
        assert!(!tmp.path().join("other").exists());

        let target = Arc::new(MemoryStore::new());
        let upload = Direction::Upload {
            from: root,
            prefix: "movie".to_string(),
        };
        let report = sync_tree(target.clone(), &upload, &settings, &progress).await;
        assert!(report.is_success());
        assert_eq!(report.attempted, 2);
        assert_eq!(
            target.keys(),
            vec!["movie/a/b.ts".to_string(), "movie/c.m3u8".to_string()]
        );
        assert_eq!(target.object("movie/a/b.ts").unwrap().content_type, "video/mp2t");
        assert_eq!(
            target.object("movie/c.m3u8").unwrap().content_type,
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(progress.objects_downloaded.get(), 2);
        assert_eq!(progress.objects_uploaded.get(), 2);
        assert!(logs_contain("sync finished"));
        Ok(())
    }

    #[tokio::test]
    async fn rerun_overwrites_in_place() -> anyhow::Result<()> {
        let tmp = testutils::setup_media_dir().await?;
        let progress = Arc::new(Progress::new());
        let target = Arc::new(MemoryStore::new());
        let upload = Direction::Upload {
            from: tmp.path().join("movie"),
            prefix: "movie".to_string(),
        };
        let first = sync_tree(target.clone(), &upload, &Settings::default(), &progress).await;
        let keys = target.keys();
        let second = sync_tree(target.clone(), &upload, &Settings::default(), &progress).await;
        assert!(first.is_success() && second.is_success());
        assert_eq!(target.keys(), keys);
        assert_eq!(keys.len(), testutils::MEDIA_FILES.len());
        assert_eq!(target.put_count(), 2 * keys.len());
        for relative_path in testutils::MEDIA_FILES {
            let object = target.object(&format!("movie/{relative_path}")).unwrap();
            assert_eq!(object.data, testutils::media_contents(relative_path));
        }
        Ok(())
    }

    #[tokio::test]
    async fn failed_transfer_is_reported() -> anyhow::Result<()> {
        let tmp = testutils::setup_media_dir().await?;
        let progress = Arc::new(Progress::new());
        let target = Arc::new(MemoryStore::new());
        target.fail_puts_ending_with("data001.ts");
        let settings = Settings {
            max_in_flight: 1,
            ..Default::default()
        };
        let upload = Direction::Upload {
            from: tmp.path().join("movie"),
            prefix: "movie".to_string(),
        };
        let report = sync_tree(target, &upload, &settings, &progress).await;
        assert!(!report.is_success());
        assert_eq!(report.failed, 1);
        assert!(report.attempted <= testutils::MEDIA_FILES.len());
        assert!(report.first_error.unwrap().contains("data001.ts"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_counts_as_failure() {
        let progress = Arc::new(Progress::new());
        let upload = Direction::Upload {
            from: std::path::PathBuf::from("/nonexistent/bsync/source"),
            prefix: "x".to_string(),
        };
        let report = sync_tree(
            Arc::new(MemoryStore::new()),
            &upload,
            &Settings::default(),
            &progress,
        )
        .await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.failed, 1);
        assert!(report.first_error.unwrap().contains("enumerating"));
    }

    #[tokio::test]
    async fn unreachable_origin_counts_as_failure() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let origin = seeded_origin();
        origin.set_unreachable(true);
        let download = Direction::Download {
            prefix: "movie".to_string(),
            into: tmp.path().to_path_buf(),
        };
        let report = sync_tree(
            origin,
            &download,
            &Settings::default(),
            &Arc::new(Progress::new()),
        )
        .await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_prefix_downloads_whole_bucket() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let download = Direction::Download {
            prefix: String::new(),
            into: tmp.path().to_path_buf(),
        };
        let report = sync_tree(
            seeded_origin(),
            &download,
            &Settings::default(),
            &Arc::new(Progress::new()),
        )
        .await;
        assert_eq!(report.attempted, 3);
        assert!(tmp.path().join("other").join("d.ts").exists());
        Ok(())
    }

    #[tokio::test]
    async fn dot_segment_prefix_is_rejected() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let download = Direction::Download {
            prefix: "movie/..".to_string(),
            into: tmp.path().join("downloads"),
        };
        let report = sync_tree(
            seeded_origin(),
            &download,
            &Settings::default(),
            &Arc::new(Progress::new()),
        )
        .await;
        assert_eq!(report.failed, 1);
        assert!(report.first_error.unwrap().contains("preparing destination"));
        assert!(!tmp.path().join("downloads").exists());
        Ok(())
    }

    #[test]
    fn report_display() {
        let report = SyncReport {
            target: Some(TargetEndpoint::new("eu-west-1", "media-eu")),
            attempted: 4,
            failed: 1,
            first_error: Some("boom".to_string()),
        };
        let text = report.to_string();
        assert!(text.contains("target: eu-west-1:media-eu"));
        assert!(text.contains("transfers attempted: 4"));
        assert!(text.contains("first error: boom"));
    }
}
