use store::TargetEndpoint;

/// Failure kinds of a sync or replication run.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so it can be logged with any format
/// specifier:
/// ```ignore
/// tracing::error!("sync failed: {}", &error);   // ✅ Shows full chain
/// tracing::error!("sync failed: {:#}", &error); // ✅ Shows full chain
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// missing or invalid target descriptor, surfaced before any work starts
    #[error("invalid configuration: {source:#}")]
    Configuration {
        #[source]
        source: anyhow::Error,
    },
    /// destination unreachable or missing, surfaced before any transfer
    #[error("preflight check of {target} failed: {source:#}")]
    Preflight {
        target: TargetEndpoint,
        #[source]
        source: anyhow::Error,
    },
    /// listing or walking the source could not complete
    #[error("enumerating {location} failed: {source:#}")]
    Enumeration {
        location: String,
        #[source]
        source: anyhow::Error,
    },
    /// the local root of a download could not be created
    #[error("preparing destination {location} failed: {source:#}")]
    Destination {
        location: String,
        #[source]
        source: anyhow::Error,
    },
    /// one object could not be read or written
    #[error("transfer of {relative_path:?} failed: {source:#}")]
    Transfer {
        relative_path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn configuration(source: impl Into<anyhow::Error>) -> Self {
        Error::Configuration {
            source: source.into(),
        }
    }

    pub fn enumeration(location: impl std::fmt::Display, source: anyhow::Error) -> Self {
        Error::Enumeration {
            location: location.to_string(),
            source,
        }
    }

    pub fn transfer(relative_path: &str, source: anyhow::Error) -> Self {
        Error::Transfer {
            relative_path: relative_path.to_string(),
            source,
        }
    }
}
