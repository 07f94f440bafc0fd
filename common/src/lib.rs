//! Replication engine shared by the bsync tools
//!
//! Moves trees of objects between an object store and the local filesystem, and fans a local
//! tree out to several object stores at once. Everything runs on tokio and is bounded by a
//! per-sync admission gate.
//!
//! # Building blocks
//!
//! - [`enumerate`] - lazy task sources: paginated remote listings and local directory walks
//! - [`transfer`] - one download or upload of one object, no retries
//! - [`scheduler`] - dispatches tasks with at most N in flight, stops admitting after the first
//!   failure and waits for everything in flight
//! - [`sync`] - one tree, one direction, one store ([`sync_tree`])
//! - [`replicate`] - one local tree to many targets, with configuration and preflight checks
//!   before anything is written ([`replicate()`])
//!
//! # Error handling
//!
//! Neither [`sync_tree`] nor [`replicate()`] returns an error: both always produce a report.
//! Failures are described by [`Error`] and rendered into the reports with the full error chain.
//!
//! # Progress
//!
//! Counters live in a [`Progress`] created by the caller of a run, so concurrent runs never
//! share counters. [`run`] creates one per invocation and can render it while the run is going.

pub mod config;
pub mod content_type;
pub mod enumerate;
pub mod error;
pub mod partition;
pub mod progress;
pub mod replicate;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod transfer;

#[cfg(test)]
mod testutils;

use std::io::IsTerminal;
use std::sync::Arc;

pub use config::{DEFAULT_MAX_IN_FLIGHT, OutputConfig, RuntimeConfig, Settings};
pub use error::Error;
pub use progress::Progress;
pub use replicate::{ReplicationReport, Status, replicate};
pub use sync::{Direction, SyncReport, sync_tree};

/// How progress is rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressType {
    /// `ProgressBar` when stderr is a terminal, `TextUpdates` otherwise
    #[default]
    Auto,
    ProgressBar,
    TextUpdates,
}

impl std::str::FromStr for ProgressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "auto" => Ok(ProgressType::Auto),
            "progressbar" => Ok(ProgressType::ProgressBar),
            "textupdates" => Ok(ProgressType::TextUpdates),
            _ => Err(format!(
                "invalid progress type {s:?}, expected one of: Auto, ProgressBar, TextUpdates"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// human readable delay between updates, e.g. "200ms" or "10s"
    pub progress_delay: Option<String>,
}

impl ProgressSettings {
    fn resolve(&self) -> anyhow::Result<(ProgressType, std::time::Duration)> {
        let progress_type = match self.progress_type {
            ProgressType::Auto if std::io::stderr().is_terminal() => ProgressType::ProgressBar,
            ProgressType::Auto => ProgressType::TextUpdates,
            other => other,
        };
        let delay = match &self.progress_delay {
            Some(delay) => humantime::parse_duration(delay)
                .map_err(|err| anyhow::anyhow!("invalid progress delay {:?}: {}", delay, err))?,
            None if progress_type == ProgressType::ProgressBar => {
                std::time::Duration::from_millis(200)
            }
            None => std::time::Duration::from_secs(10),
        };
        Ok((progress_type, delay))
    }
}

async fn show_progress(
    progress: Arc<Progress>,
    progress_type: ProgressType,
    delay: std::time::Duration,
    mut stop: tokio::sync::oneshot::Receiver<()>,
) {
    let mut printer = progress::ProgressPrinter::new(&progress);
    if progress_type == ProgressType::ProgressBar {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        loop {
            bar.set_message(printer.status_line());
            bar.tick();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop => break,
            }
        }
        bar.finish_and_clear();
    } else {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => eprintln!("{}", printer.print()),
                _ = &mut stop => break,
            }
        }
    }
}

fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet && output.verbose == 0 {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // a subscriber may already be installed, e.g. when running inside tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Runs `func` on a fresh tokio runtime with logging and optional progress reporting set up.
///
/// Returns `None` when `func` failed; the error has already been logged by then.
pub fn run<Fut, Summary>(
    progress_settings: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce(Arc<Progress>) -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let progress_settings = match progress_settings.as_ref().map(ProgressSettings::resolve) {
        Some(Ok(resolved)) => Some(resolved),
        Some(Err(error)) => {
            tracing::error!("{:#}", &error);
            return None;
        }
        None => None,
    };
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            tracing::error!("failed to start the tokio runtime: {:#}", &error);
            return None;
        }
    };
    let progress = Arc::new(Progress::new());
    let res = tokio_runtime.block_on(async {
        let printer = progress_settings.map(|(progress_type, delay)| {
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
            let handle = tokio::spawn(show_progress(
                progress.clone(),
                progress_type,
                delay,
                stop_rx,
            ));
            (stop_tx, handle)
        });
        let res = func(progress.clone()).await;
        if let Some((stop_tx, handle)) = printer {
            let _ = stop_tx.send(());
            if let Err(error) = handle.await {
                tracing::debug!("progress printer did not finish cleanly: {}", &error);
            }
        }
        res
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
