//! Command line and environment configuration shared by `bsync` and `bsyncd`

use anyhow::anyhow;
use store::{Credentials, TargetEndpoint};

/// Endpoint of a Cloudflare R2 account
pub fn r2_endpoint(account_id: &str) -> String {
    format!("https://{account_id}.r2.cloudflarestorage.com")
}

fn credentials(
    access_key_id: &Option<String>,
    secret_access_key: &Option<String>,
) -> Option<Credentials> {
    match (access_key_id, secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => {
            Some(Credentials::new(access_key_id, secret_access_key))
        }
        _ => None,
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

/// The bucket objects are replicated from
#[derive(clap::Args, Clone)]
pub struct OriginArgs {
    /// Bucket holding the objects to replicate
    #[arg(long, env = "R2_BUCKET_NAME", value_name = "BUCKET", help_heading = "Origin")]
    pub origin_bucket: Option<String>,

    /// Cloudflare R2 account id, the endpoint becomes `https://<ID>.r2.cloudflarestorage.com`
    #[arg(long, env = "R2_ACCOUNT_ID", value_name = "ID", help_heading = "Origin")]
    pub origin_account_id: Option<String>,

    /// Endpoint URL of the origin, takes precedence over --origin-account-id
    ///
    /// `file:///some/dir` serves buckets from subdirectories of a local directory.
    #[arg(long, value_name = "URL", help_heading = "Origin")]
    pub origin_endpoint: Option<String>,

    /// Region of the origin bucket
    #[arg(
        long,
        default_value = "auto",
        value_name = "REGION",
        help_heading = "Origin"
    )]
    pub origin_region: String,

    /// Access key id of the origin
    #[arg(
        long,
        env = "R2_ACCESS_KEY_ID",
        hide_env_values = true,
        value_name = "KEY",
        help_heading = "Origin"
    )]
    pub origin_access_key_id: Option<String>,

    /// Secret access key of the origin
    #[arg(
        long,
        env = "R2_SECRET_ACCESS_KEY",
        hide_env_values = true,
        value_name = "SECRET",
        help_heading = "Origin"
    )]
    pub origin_secret_access_key: Option<String>,
}

impl std::fmt::Debug for OriginArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("OriginArgs")
            .field("origin_bucket", &self.origin_bucket)
            .field("origin_account_id", &self.origin_account_id)
            .field("origin_endpoint", &self.origin_endpoint)
            .field("origin_region", &self.origin_region)
            .field("origin_access_key_id", &self.origin_access_key_id)
            .field(
                "origin_secret_access_key",
                &redacted(&self.origin_secret_access_key),
            )
            .finish()
    }
}

impl OriginArgs {
    pub fn endpoint(&self) -> anyhow::Result<TargetEndpoint> {
        let bucket = self.origin_bucket.as_deref().ok_or_else(|| {
            anyhow!("origin bucket is not configured, use --origin-bucket or set R2_BUCKET_NAME")
        })?;
        let mut endpoint = TargetEndpoint::new(&self.origin_region, bucket);
        if let Some(url) = &self.origin_endpoint {
            endpoint = endpoint.with_endpoint(url);
        } else if let Some(account_id) = &self.origin_account_id {
            endpoint = endpoint.with_endpoint(r2_endpoint(account_id));
        }
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        credentials(&self.origin_access_key_id, &self.origin_secret_access_key)
    }
}

/// The buckets objects are replicated to
#[derive(clap::Args, Clone)]
pub struct TargetArgs {
    /// Destination bucket as REGION:BUCKET[@ENDPOINT_URL] (can be specified multiple times)
    ///
    /// Example: `eu-west-1:media-eu` or `auto:media@https://<account>.r2.cloudflarestorage.com`.
    /// The environment variable takes a comma-separated list.
    #[arg(
        long = "target",
        env = "BSYNC_TARGETS",
        value_name = "TARGET",
        value_delimiter = ',',
        required = true,
        action = clap::ArgAction::Append,
        help_heading = "Targets"
    )]
    pub targets: Vec<TargetEndpoint>,

    /// Access key id used for every target
    #[arg(
        long,
        env = "AWS_ACCESS_KEY_ID",
        hide_env_values = true,
        value_name = "KEY",
        help_heading = "Targets"
    )]
    pub target_access_key_id: Option<String>,

    /// Secret access key used for every target
    #[arg(
        long,
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true,
        value_name = "SECRET",
        help_heading = "Targets"
    )]
    pub target_secret_access_key: Option<String>,
}

impl std::fmt::Debug for TargetArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TargetArgs")
            .field("targets", &self.targets)
            .field("target_access_key_id", &self.target_access_key_id)
            .field(
                "target_secret_access_key",
                &redacted(&self.target_secret_access_key),
            )
            .finish()
    }
}

impl TargetArgs {
    pub fn credentials(&self) -> Option<Credentials> {
        credentials(&self.target_access_key_id, &self.target_secret_access_key)
    }
}

/// Scheduling of transfers
#[derive(clap::Args, Debug, Clone)]
pub struct TransferArgs {
    /// Maximum number of transfers in flight per target
    #[arg(
        long,
        global = true,
        default_value_t = common::DEFAULT_MAX_IN_FLIGHT,
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    pub max_in_flight: usize,

    /// Throttle the number of transfers started per second, 0 means no throttle
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    pub ops_throttle: usize,

    /// Give up on a single transfer after this long, e.g. "30s" or "5min"
    #[arg(
        long,
        global = true,
        value_name = "DURATION",
        help_heading = "Performance & throttling"
    )]
    pub transfer_timeout: Option<humantime::Duration>,
}

impl TransferArgs {
    pub fn settings(&self) -> anyhow::Result<common::Settings> {
        let settings = common::Settings {
            max_in_flight: self.max_in_flight,
            ops_throttle: self.ops_throttle,
            transfer_timeout: self.transfer_timeout.map(Into::into),
        };
        settings.validate().map_err(|reason| anyhow!(reason))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        origin: OriginArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        transfer: TransferArgs,
    }

    #[test]
    fn account_id_builds_r2_endpoint() -> anyhow::Result<()> {
        let args = TestArgs::try_parse_from([
            "test",
            "--origin-bucket",
            "media",
            "--origin-account-id",
            "acct",
            "--target",
            "eu-west-1:media-eu",
        ])?;
        let origin = args.origin.endpoint()?;
        assert_eq!(origin.region, "auto");
        assert_eq!(
            origin.endpoint_url.as_deref(),
            Some("https://acct.r2.cloudflarestorage.com")
        );
        Ok(())
    }

    #[test]
    fn explicit_endpoint_wins() -> anyhow::Result<()> {
        let args = TestArgs::try_parse_from([
            "test",
            "--origin-bucket",
            "media",
            "--origin-account-id",
            "acct",
            "--origin-endpoint",
            "http://localhost:9000",
            "--target",
            "eu-west-1:media-eu",
        ])?;
        assert_eq!(
            args.origin.endpoint()?.endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );
        Ok(())
    }

    #[test]
    fn targets_repeat_and_split_on_commas() -> anyhow::Result<()> {
        let args = TestArgs::try_parse_from([
            "test",
            "--target",
            "us-east-1:media-us,eu-west-1:media-eu",
            "--target",
            "ap-south-1:media-ap",
        ])?;
        let buckets: Vec<_> = args
            .targets
            .targets
            .iter()
            .map(|target| target.bucket.as_str())
            .collect();
        assert_eq!(buckets, vec!["media-us", "media-eu", "media-ap"]);
        Ok(())
    }

    #[test]
    fn invalid_target_is_rejected() {
        assert!(TestArgs::try_parse_from(["test", "--target", "media-eu"]).is_err());
    }

    #[test]
    fn credentials_need_both_halves() {
        assert!(credentials(&Some("AKIA".to_string()), &None).is_none());
        assert!(credentials(&Some("AKIA".to_string()), &Some("s".to_string())).is_some());
    }

    #[test]
    fn debug_output_hides_secret_keys() -> anyhow::Result<()> {
        let args = TestArgs::try_parse_from([
            "test",
            "--origin-bucket",
            "media",
            "--origin-access-key-id",
            "AKIAORIGIN",
            "--origin-secret-access-key",
            "origin-secret-value",
            "--target",
            "us-east-1:media-us",
            "--target-access-key-id",
            "AKIATARGET",
            "--target-secret-access-key",
            "target-secret-value",
        ])?;
        let printed = format!("{args:?}");
        assert!(!printed.contains("origin-secret-value"), "{printed}");
        assert!(!printed.contains("target-secret-value"), "{printed}");
        assert!(printed.contains("AKIAORIGIN"));
        assert!(printed.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn transfer_settings() -> anyhow::Result<()> {
        let args = TestArgs::try_parse_from([
            "test",
            "--target",
            "us-east-1:media-us",
            "--max-in-flight",
            "4",
            "--transfer-timeout",
            "30s",
        ])?;
        let settings = args.transfer.settings()?;
        assert_eq!(settings.max_in_flight, 4);
        assert_eq!(
            settings.transfer_timeout,
            Some(std::time::Duration::from_secs(30))
        );
        let args = TestArgs::try_parse_from([
            "test",
            "--target",
            "us-east-1:media-us",
            "--max-in-flight",
            "0",
        ])?;
        assert!(args.transfer.settings().is_err());
        Ok(())
    }
}
