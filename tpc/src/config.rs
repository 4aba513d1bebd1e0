//! Tunables of the third-party-copy layer

/// Smallest transfer block size, also the default.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Largest transfer block size, a source never serves longer reads.
pub const MAX_BLOCK_SIZE: u64 = remote::protocol::MAX_READ_LEN;

#[derive(Debug, Clone)]
pub struct TpcConfig {
    /// Lifetime of a freshly created session
    pub session_ttl: std::time::Duration,
    /// How far into the past a consumed session's expiry is moved
    pub consumed_backdate: std::time::Duration,
    /// Expired sessions are swept once they are this much past their expiry
    pub sweep_grace: std::time::Duration,
    /// Number of times a verifying open looks for a missing key
    pub verify_attempts: u32,
    /// Delay between two looks for a missing key
    pub verify_interval: std::time::Duration,
    /// Transfer block size, between [`DEFAULT_BLOCK_SIZE`] and [`MAX_BLOCK_SIZE`]
    pub block_size: u64,
    pub remote_open_timeout: std::time::Duration,
    pub remote_read_timeout: std::time::Duration,
    /// Closing the remote source may include checksum finalization, hence the longer timeout
    pub remote_close_timeout: std::time::Duration,
    /// Suggested client poll delay while a transfer runs
    pub poll_after: std::time::Duration,
    /// Security protocol whose callers are exempt from the origin check
    pub trusted_protocol: String,
}

impl Default for TpcConfig {
    fn default() -> Self {
        Self {
            session_ttl: std::time::Duration::from_secs(60),
            consumed_backdate: std::time::Duration::from_secs(10),
            sweep_grace: std::time::Duration::from_secs(4 * 3600),
            verify_attempts: 150,
            verify_interval: std::time::Duration::from_millis(100),
            block_size: DEFAULT_BLOCK_SIZE,
            remote_open_timeout: std::time::Duration::from_secs(30),
            remote_read_timeout: std::time::Duration::from_secs(30),
            remote_close_timeout: std::time::Duration::from_secs(300),
            poll_after: std::time::Duration::from_secs(1800),
            trusted_protocol: "sss".to_string(),
        }
    }
}

impl TpcConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        let durations = [
            ("session_ttl", self.session_ttl),
            ("verify_interval", self.verify_interval),
            ("remote_open_timeout", self.remote_open_timeout),
            ("remote_read_timeout", self.remote_read_timeout),
            ("remote_close_timeout", self.remote_close_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        if self.verify_attempts == 0 {
            return Err("verify_attempts must be at least 1".to_string());
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(format!("block_size must not exceed {MAX_BLOCK_SIZE} bytes"));
        }
        Ok(())
    }

    /// Total time a verifying open waits for its key to show up.
    pub fn verify_window(&self) -> std::time::Duration {
        self.verify_interval * self.verify_attempts
    }

    /// Block size actually used for transfers.
    pub fn effective_block_size(&self) -> u64 {
        clamp_block_size(self.block_size)
    }
}

pub fn clamp_block_size(block_size: u64) -> u64 {
    block_size.clamp(DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TpcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.verify_window(), std::time::Duration::from_secs(15));
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = TpcConfig {
            verify_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TpcConfig {
            remote_read_timeout: std::time::Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("remote_read_timeout"));
    }

    #[test]
    fn small_block_sizes_are_raised() {
        let config = TpcConfig {
            block_size: 1024,
            ..Default::default()
        };
        assert_eq!(config.effective_block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(clamp_block_size(16 << 20), 16 << 20);
    }

    #[test]
    fn huge_block_sizes_are_capped() {
        assert_eq!(clamp_block_size(1 << 60), MAX_BLOCK_SIZE);
        let config = TpcConfig {
            block_size: MAX_BLOCK_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("block_size"));
        assert_eq!(config.effective_block_size(), MAX_BLOCK_SIZE);
    }
}
