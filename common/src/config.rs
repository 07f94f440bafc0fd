//! Configuration types for runtime and execution settings

use std::num::NonZeroUsize;

/// Default number of transfers in flight per target
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Transfer scheduling settings, shared by every target of a run
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Maximum number of transfers in flight for one sync
    pub max_in_flight: usize,
    /// Transfers admitted per second (0 = no throttle)
    pub ops_throttle: usize,
    /// Deadline of a single transfer (None = no deadline)
    pub transfer_timeout: Option<std::time::Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ops_throttle: 0,
            transfer_timeout: None,
        }
    }
}

impl Settings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than 0".to_string());
        }
        if matches!(self.transfer_timeout, Some(timeout) if timeout.is_zero()) {
            return Err("transfer_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    pub(crate) fn concurrency(&self) -> Result<NonZeroUsize, String> {
        self.validate()?;
        NonZeroUsize::new(self.max_in_flight)
            .ok_or_else(|| "max_in_flight must be greater than 0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.max_in_flight, 20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn reject_zero_concurrency() {
        let settings = Settings {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(settings.concurrency().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let settings = Settings {
            transfer_timeout: Some(std::time::Duration::ZERO),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
