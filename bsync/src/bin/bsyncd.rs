use anyhow::{Context, Result};
use bsync::args::{OriginArgs, TargetArgs, TransferArgs};
use bsync::server::AppState;
use clap::Parser;
use std::sync::Arc;
use store::{Connector, DefaultConnector};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bsyncd",
    version,
    about = "HTTP server mirroring origin prefixes to every target on request",
    long_about = "`bsyncd` serves two endpoints:

    GET  /ping                             -> {\"message\": \"pong\"}
    POST /sync {\"bucketName\": \"<prefix>\"}  -> mirrors the prefix to every target

A sync answers 200 when every target received every object, 500 when the download or any
target failed and 503 when the targets could not be prepared.

EXAMPLE:
    PORT=8080 R2_ACCOUNT_ID=... R2_BUCKET_NAME=media \\
        bsyncd --target us-east-1:media-us --target eu-west-1:media-eu"
)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080", help_heading = "Server")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR", help_heading = "Server")]
    bind: std::net::IpAddr,

    /// Directory holding per-request staging directories, defaults to the system temporary directory
    #[arg(long, value_name = "DIR", help_heading = "Server")]
    staging_dir: Option<std::path::PathBuf>,

    #[command(flatten)]
    origin: OriginArgs,

    #[command(flatten)]
    targets: TargetArgs,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Output")]
    quiet: bool,

    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

async fn async_main(args: Args) -> Result<&'static str> {
    let settings = args.transfer.settings()?;
    let endpoint = args.origin.endpoint()?;
    let origin = DefaultConnector::new(args.origin.credentials())
        .connect(&endpoint)
        .await
        .with_context(|| format!("cannot create a client for origin {endpoint}"))?;
    let state = AppState {
        origin,
        connector: Arc::new(DefaultConnector::new(args.targets.credentials())),
        targets: Arc::new(args.targets.targets.clone()),
        settings,
        staging_root: args.staging_dir.clone().unwrap_or_else(std::env::temp_dir),
    };
    tracing::info!(
        "mirroring {} to {} target(s)",
        endpoint,
        state.targets.len()
    );
    bsync::server::serve(state, std::net::SocketAddr::new(args.bind, args.port)).await?;
    Ok("bsyncd stopped")
}

fn main() -> Result<()> {
    // a missing .env file is fine, everything can come from flags or the environment
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: false,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(None, output, runtime, |_progress| async_main(args));
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
