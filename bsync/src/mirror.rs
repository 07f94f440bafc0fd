//! Origin prefix to every target, through a local staging directory
//!
//! The prefix is downloaded into a fresh directory under the staging root, that directory is
//! replicated to the targets and then removed, whatever the outcome.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use common::task::last_segment;
use common::{Direction, Progress, ReplicationReport, Settings, Status, SyncReport};
use store::{Connector, ObjectStore, TargetEndpoint};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MirrorReport {
    pub status: Status,
    pub download: SyncReport,
    /// missing when the download failed and nothing was replicated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationReport>,
}

impl MirrorReport {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl std::fmt::Display for MirrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "mirror: {}\n\ndownload:\n{}", self.status, self.download)?;
        if let Some(replication) = &self.replication {
            write!(f, "\n\n{replication}")?;
        }
        Ok(())
    }
}

/// Downloads `prefix` from `origin` and replicates it to `targets`.
///
/// Only a failure to set up the staging directory is returned as an error, every other
/// failure is described by the report.
#[instrument(skip(origin, connector, progress))]
pub async fn mirror(
    origin: Arc<dyn ObjectStore>,
    prefix: &str,
    staging_root: &std::path::Path,
    connector: &dyn Connector,
    targets: &[TargetEndpoint],
    settings: &Settings,
    progress: &Arc<Progress>,
) -> anyhow::Result<MirrorReport> {
    if last_segment(prefix).is_empty() {
        return Err(anyhow!("prefix {:?} does not name a directory", prefix));
    }
    tokio::fs::create_dir_all(staging_root)
        .await
        .with_context(|| format!("cannot create staging directory {:?}", staging_root))?;
    let staging = tempfile::Builder::new()
        .prefix("bsync-")
        .tempdir_in(staging_root)
        .with_context(|| format!("cannot create staging directory in {:?}", staging_root))?;
    let direction = Direction::Download {
        prefix: prefix.to_string(),
        into: staging.path().to_path_buf(),
    };
    let download = common::sync_tree(origin, &direction, settings, progress).await;
    let report = if download.is_success() {
        let source = Direction::download_root(prefix, staging.path());
        let replication = common::replicate(connector, &source, targets, settings, progress).await;
        MirrorReport {
            status: replication.status,
            download,
            replication: Some(replication),
        }
    } else {
        tracing::error!("download of {:?} failed, nothing replicated", prefix);
        MirrorReport {
            status: Status::Failure,
            download,
            replication: None,
        }
    };
    let staging_path = staging.path().to_path_buf();
    match tokio::task::spawn_blocking(move || staging.close()).await {
        Ok(Ok(())) => tracing::debug!("removed staging directory {:?}", &staging_path),
        Ok(Err(error)) => {
            tracing::error!("failed removing staging directory {:?}: {}", &staging_path, error)
        }
        Err(error) => {
            tracing::error!("failed removing staging directory {:?}: {}", &staging_path, error)
        }
    }
    Ok(report)
}
