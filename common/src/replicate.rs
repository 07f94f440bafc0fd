//! Fan-out of one local tree to many targets
//!
//! A run walks through `Idle -> Preflighting -> {Aborted | Replicating} -> Reporting -> Done`.
//! Nothing is written anywhere before every target has been configured and probed; once
//! replication starts each target gets its own upload sync, and a failing target never stops
//! the others.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use store::{Connector, ObjectStore, TargetEndpoint};
use tracing::instrument;

use crate::config::Settings;
use crate::error::Error;
use crate::progress::Progress;
use crate::sync::{Direction, SyncReport, sync_tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Preflighting,
    Aborted,
    Replicating,
    Reporting,
    Done,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Preflighting)
                | (Phase::Preflighting, Phase::Aborted)
                | (Phase::Preflighting, Phase::Replicating)
                | (Phase::Aborted, Phase::Reporting)
                | (Phase::Replicating, Phase::Reporting)
                | (Phase::Reporting, Phase::Done)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// every target finished without a failure
    Success,
    /// some targets are complete, some are not
    PartialSuccess,
    /// no target is complete
    Failure,
    /// stopped during configuration or preflight, nothing was transferred
    Aborted,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::PartialSuccess => "partial success",
            Status::Failure => "failure",
            Status::Aborted => "aborted",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PreflightFailure {
    pub target: TargetEndpoint,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Configuration { reason: String },
    Preflight { failures: Vec<PreflightFailure> },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AbortReason::Configuration { reason } => write!(f, "configuration: {reason}"),
            AbortReason::Preflight { failures } => {
                write!(f, "preflight failed for {} target(s)", failures.len())?;
                for failure in failures {
                    write!(f, "\n  {}: {}", failure.target, failure.reason)?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of one replication run
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReplicationReport {
    /// one report per requested target, in request order, empty when aborted
    pub targets: Vec<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReason>,
    /// every phase the run went through, the last one is the final phase
    pub phases: Vec<Phase>,
    pub status: Status,
    pub success: bool,
}

impl ReplicationReport {
    pub fn phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Idle)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }
}

impl std::fmt::Display for ReplicationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "replication: {}", self.status)?;
        if let Some(abort) = &self.abort {
            write!(f, "\naborted at {abort}")?;
        }
        for report in &self.targets {
            write!(f, "\n\n{report}")?;
        }
        Ok(())
    }
}

struct Run {
    phases: Vec<Phase>,
}

impl Run {
    fn new() -> Self {
        Self {
            phases: vec![Phase::Idle],
        }
    }

    fn advance(&mut self, next: Phase) {
        let current = self.phases.last().copied().unwrap_or(Phase::Idle);
        debug_assert!(
            current.can_advance_to(next),
            "invalid phase transition {current:?} -> {next:?}"
        );
        tracing::info!("replication phase {:?} -> {:?}", current, next);
        self.phases.push(next);
    }

    fn aborted(mut self, abort: AbortReason) -> ReplicationReport {
        tracing::error!("replication aborted: {}", &abort);
        self.advance(Phase::Aborted);
        self.advance(Phase::Reporting);
        self.advance(Phase::Done);
        ReplicationReport {
            targets: vec![],
            abort: Some(abort),
            phases: self.phases,
            status: Status::Aborted,
            success: false,
        }
    }

    fn completed(mut self, targets: Vec<SyncReport>) -> ReplicationReport {
        self.advance(Phase::Reporting);
        let clean = targets.iter().filter(|report| report.is_success()).count();
        let status = if clean == targets.len() {
            Status::Success
        } else if clean == 0 {
            Status::Failure
        } else {
            Status::PartialSuccess
        };
        self.advance(Phase::Done);
        ReplicationReport {
            success: status == Status::Success,
            targets,
            abort: None,
            phases: self.phases,
            status,
        }
    }
}

/// Canonical source directory and the remote prefix derived from its last segment.
async fn resolve_source(
    local_source_dir: &std::path::Path,
) -> anyhow::Result<(std::path::PathBuf, String)> {
    let source = tokio::fs::canonicalize(local_source_dir)
        .await
        .with_context(|| format!("source directory {:?} does not exist", local_source_dir))?;
    let metadata = tokio::fs::metadata(&source)
        .await
        .with_context(|| format!("failed reading metadata of {:?}", &source))?;
    if !metadata.is_dir() {
        return Err(anyhow!("source {:?} is not a directory", local_source_dir));
    }
    let prefix = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("cannot derive a prefix from {:?}", &source))?
        .to_string();
    Ok((source, prefix))
}

struct Configured {
    source: std::path::PathBuf,
    prefix: String,
    stores: Vec<Arc<dyn ObjectStore>>,
}

async fn configure(
    connector: &dyn Connector,
    local_source_dir: &std::path::Path,
    targets: &[TargetEndpoint],
    settings: &Settings,
) -> Result<Configured, Error> {
    if targets.is_empty() {
        return Err(Error::configuration(anyhow!("no targets configured")));
    }
    settings
        .validate()
        .map_err(|reason| Error::configuration(anyhow!(reason)))?;
    for target in targets {
        target.validate().map_err(Error::configuration)?;
    }
    let (source, prefix) = resolve_source(local_source_dir)
        .await
        .map_err(Error::configuration)?;
    let mut stores = Vec::with_capacity(targets.len());
    for target in targets {
        let store = connector
            .connect(target)
            .await
            .with_context(|| format!("cannot create a client for target {target}"))
            .map_err(Error::configuration)?;
        stores.push(store);
    }
    Ok(Configured {
        source,
        prefix,
        stores,
    })
}

async fn preflight(
    targets: &[TargetEndpoint],
    stores: &[Arc<dyn ObjectStore>],
) -> Vec<PreflightFailure> {
    let probes = targets.iter().zip(stores).map(|(target, store)| async move {
        let result = store.head().await;
        (target, result)
    });
    futures::future::join_all(probes)
        .await
        .into_iter()
        .filter_map(|(target, result)| {
            let error = Error::Preflight {
                target: target.clone(),
                source: result.err()?,
            };
            tracing::error!("{:#}", &error);
            Some(PreflightFailure {
                target: target.clone(),
                reason: format!("{error:#}"),
            })
        })
        .collect()
}

/// Uploads `local_source_dir` to every target, each under the prefix named after the last
/// segment of the directory.
#[instrument(skip(connector, progress))]
pub async fn replicate(
    connector: &dyn Connector,
    local_source_dir: &std::path::Path,
    targets: &[TargetEndpoint],
    settings: &Settings,
    progress: &Arc<Progress>,
) -> ReplicationReport {
    let mut run = Run::new();
    run.advance(Phase::Preflighting);
    let Configured {
        source,
        prefix,
        stores,
    } = match configure(connector, local_source_dir, targets, settings).await {
        Ok(configured) => configured,
        Err(error) => {
            return run.aborted(AbortReason::Configuration {
                reason: format!("{error:#}"),
            });
        }
    };
    let failures = preflight(targets, &stores).await;
    if !failures.is_empty() {
        return run.aborted(AbortReason::Preflight { failures });
    }
    run.advance(Phase::Replicating);
    let direction = Direction::Upload {
        from: source,
        prefix,
    };
    let mut join_set = tokio::task::JoinSet::new();
    for (idx, store) in stores.into_iter().enumerate() {
        let direction = direction.clone();
        let settings = *settings;
        let progress = progress.clone();
        join_set.spawn(async move {
            let report = sync_tree(store, &direction, &settings, &progress).await;
            (idx, report)
        });
    }
    let mut reports: Vec<Option<SyncReport>> = vec![None; targets.len()];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, report)) => reports[idx] = Some(report),
            Err(error) => tracing::error!("target sync did not complete: {}", &error),
        }
    }
    let reports = reports
        .into_iter()
        .zip(targets)
        .map(|(report, target)| {
            let mut report = report.unwrap_or_else(|| SyncReport {
                failed: 1,
                first_error: Some("target sync did not complete".to_string()),
                ..Default::default()
            });
            report.target = Some(target.clone());
            if report.is_success() {
                tracing::info!("target {} complete: {} object(s)", target, report.attempted);
            } else {
                tracing::error!("target {} failed: {} failure(s)", target, report.failed);
            }
            report
        })
        .collect();
    run.completed(reports)
}
