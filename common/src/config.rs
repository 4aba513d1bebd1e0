//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for transfer workers
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of transfers pulling data at the same time (0 = no limit)
    pub max_transfers: usize,
    /// Chunk reads per second across all transfers (0 = no throttle)
    pub chunk_throttle: usize,
}

impl ThrottleConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_throttle > 0 && self.chunk_throttle < THROTTLE_INTERVALS_PER_SEC {
            return Err(format!(
                "chunk_throttle must be 0 or at least {THROTTLE_INTERVALS_PER_SEC} chunks per second"
            ));
        }
        Ok(())
    }

    /// Tokens added per replenish interval for the configured chunk throttle.
    pub fn chunk_tokens_per_interval(&self) -> usize {
        self.chunk_throttle / THROTTLE_INTERVALS_PER_SEC
    }
}

/// The chunk throttle is replenished every 100ms.
pub const THROTTLE_INTERVALS_PER_SEC: usize = 10;

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

/// Tracing configuration for debugging
#[derive(Debug, Default, Clone)]
pub struct TracingConfig {
    /// Debug log file path
    pub debug_log_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_validation() {
        assert!(ThrottleConfig::default().validate().is_ok());
        let config = ThrottleConfig {
            max_transfers: 4,
            chunk_throttle: 5,
        };
        assert!(config.validate().is_err());
        let config = ThrottleConfig {
            max_transfers: 0,
            chunk_throttle: 250,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_tokens_per_interval(), 25);
    }
}
