use anyhow::{Context, Result, anyhow};
use bsync::args::{OriginArgs, TargetArgs, TransferArgs};
use bsync::mirror::MirrorReport;
use clap::{Parser, Subcommand};
use common::{Direction, Progress, ReplicationReport, SyncReport};
use std::sync::Arc;
use store::{Connector, DefaultConnector, ObjectStore};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bsync",
    version,
    about = "Replicate trees of objects between object stores and local directories",
    long_about = "`bsync` moves trees of objects between S3-compatible buckets and local directories \
with a bounded number of transfers in flight.

EXAMPLES:
    # Download everything under videos/suit-yourself into ./downloads/suit-yourself
    bsync download videos/suit-yourself --into downloads --origin-bucket media

    # Upload a directory to two regions at once
    bsync replicate downloads/suit-yourself --target us-east-1:media-us --target eu-west-1:media-eu

    # Download from the origin and fan out, staging the files in a temporary directory
    bsync mirror suit-yourself --target us-east-1:media-us --target eu-west-1:media-eu --summary

Origin and target settings can be provided through the environment or a .env file."
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    transfer: TransferArgs,

    // Progress & output
    /// Show progress
    #[arg(long, global = true, help_heading = "Progress & output")]
    progress: bool,

    /// Toggles the type of progress to show
    ///
    /// If specified, --progress flag is implied.
    ///
    /// Options are: `ProgressBar` (animated progress bar), `TextUpdates` (appropriate for logging), Auto (default, will
    /// choose between `ProgressBar` or `TextUpdates` depending on the type of terminal attached to stderr)
    #[arg(
        long,
        global = true,
        value_name = "TYPE",
        help_heading = "Progress & output"
    )]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// - For the interactive (--progress-type=ProgressBar), the default is 200ms.
    /// - For the non-interactive (--progress-type=TextUpdates), the default is 10s.
    ///
    /// If specified, --progress flag is implied.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(
        long,
        global = true,
        value_name = "DELAY",
        help_heading = "Progress & output"
    )]
    progress_delay: Option<String>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Download every object under PREFIX from the origin into a local directory
    Download {
        /// Objects under this prefix land in `<INTO>/<last segment of PREFIX>`
        prefix: String,

        /// Directory to download into
        #[arg(long, default_value = "downloads", value_name = "DIR")]
        into: std::path::PathBuf,

        #[command(flatten)]
        origin: OriginArgs,
    },
    /// Upload a local directory to a single target
    Upload {
        /// Directory to upload
        source: std::path::PathBuf,

        /// Prefix to store the files under, defaults to the name of the directory
        #[arg(long, value_name = "PREFIX")]
        prefix: Option<String>,

        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Upload a local directory to every target, under the name of the directory
    Replicate {
        /// Directory to replicate
        source: std::path::PathBuf,

        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Download PREFIX from the origin into a staging directory and replicate it to every target
    Mirror {
        /// Prefix to mirror, its last segment becomes the prefix on the targets
        prefix: String,

        /// Directory holding the staging directories, defaults to the system temporary directory
        #[arg(long, value_name = "DIR")]
        staging_dir: Option<std::path::PathBuf>,

        #[command(flatten)]
        origin: OriginArgs,

        #[command(flatten)]
        targets: TargetArgs,
    },
}

#[derive(Debug)]
enum Summary {
    Sync(SyncReport),
    Replication(ReplicationReport),
    Mirror(MirrorReport),
}

impl Summary {
    fn is_success(&self) -> bool {
        match self {
            Summary::Sync(report) => report.is_success(),
            Summary::Replication(report) => report.success,
            Summary::Mirror(report) => report.is_success(),
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Summary::Sync(report) => write!(f, "{report}"),
            Summary::Replication(report) => write!(f, "{report}"),
            Summary::Mirror(report) => write!(f, "{report}"),
        }
    }
}

async fn connect_origin(origin: &OriginArgs) -> Result<Arc<dyn ObjectStore>> {
    let endpoint = origin.endpoint()?;
    DefaultConnector::new(origin.credentials())
        .connect(&endpoint)
        .await
        .with_context(|| format!("cannot create a client for origin {endpoint}"))
}

async fn default_prefix(source: &std::path::Path) -> Result<String> {
    let source = tokio::fs::canonicalize(source)
        .await
        .with_context(|| format!("source directory {:?} does not exist", source))?;
    source
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive a prefix from {:?}, use --prefix", &source))
}

#[instrument(skip(args, progress))]
async fn async_main(args: Args, progress: Arc<Progress>) -> Result<Summary> {
    let settings = args.transfer.settings()?;
    let summary = match &args.command {
        Command::Download {
            prefix,
            into,
            origin,
        } => {
            let store = connect_origin(origin).await?;
            let direction = Direction::Download {
                prefix: prefix.clone(),
                into: into.clone(),
            };
            Summary::Sync(common::sync_tree(store, &direction, &settings, &progress).await)
        }
        Command::Upload {
            source,
            prefix,
            targets,
        } => {
            let [target] = targets.targets.as_slice() else {
                return Err(anyhow!(
                    "upload takes exactly one target, got {}",
                    targets.targets.len()
                ));
            };
            let prefix = match prefix {
                Some(prefix) => prefix.clone(),
                None => default_prefix(source).await?,
            };
            let store = DefaultConnector::new(targets.credentials())
                .connect(target)
                .await
                .with_context(|| format!("cannot create a client for target {target}"))?;
            let direction = Direction::Upload {
                from: source.clone(),
                prefix,
            };
            let mut report = common::sync_tree(store, &direction, &settings, &progress).await;
            report.target = Some(target.clone());
            Summary::Sync(report)
        }
        Command::Replicate { source, targets } => {
            let connector = DefaultConnector::new(targets.credentials());
            Summary::Replication(
                common::replicate(&connector, source, &targets.targets, &settings, &progress)
                    .await,
            )
        }
        Command::Mirror {
            prefix,
            staging_dir,
            origin,
            targets,
        } => {
            let store = connect_origin(origin).await?;
            let connector = DefaultConnector::new(targets.credentials());
            let staging_root = staging_dir.clone().unwrap_or_else(std::env::temp_dir);
            Summary::Mirror(
                bsync::mirror::mirror(
                    store,
                    prefix,
                    &staging_root,
                    &connector,
                    &targets.targets,
                    &settings,
                    &progress,
                )
                .await?,
            )
        }
    };
    if !summary.is_success() {
        if args.summary {
            return Err(anyhow!("bsync encountered errors\n\n{}", &summary));
        }
        return Err(anyhow!("bsync encountered errors"));
    }
    Ok(summary)
}

fn main() -> Result<()> {
    // a missing .env file is fine, everything can come from flags or the environment
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let func = {
        let args = args.clone();
        |progress| async_main(args, progress)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(
        if args.progress || args.progress_type.is_some() || args.progress_delay.is_some() {
            Some(common::ProgressSettings {
                progress_type: args.progress_type.unwrap_or_default(),
                progress_delay: args.progress_delay,
            })
        } else {
            None
        },
        output,
        runtime,
        func,
    );
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
