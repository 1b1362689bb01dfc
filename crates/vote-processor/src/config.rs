//! Configuration for vote intake.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Votes a single connection may have buffered or in flight.
///
/// 2500 buffered votes stay under 1 MiB per connection.
pub const MAX_VOTES_PER_CONNECTION: usize = 2500;

/// Buffered votes older than this are dropped on the next retry sweep.
pub const TOO_OLD: Duration = Duration::from_secs(5);

/// Errors in vote processor configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the [`VoteProcessor`](crate::VoteProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteProcessorConfig {
    /// Worker threads for asynchronous dispatch.
    pub num_threads: usize,

    /// Quota of buffered or in-flight votes per connection.
    ///
    /// A connection going over it loses everything it has buffered and
    /// keeps getting `MaxExceeded` until the buffer drains.
    pub max_votes_per_connection: usize,

    /// Age in milliseconds after which buffered votes are dropped.
    pub too_old_ms: u64,
}

impl Default for VoteProcessorConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            max_votes_per_connection: MAX_VOTES_PER_CONNECTION,
            too_old_ms: TOO_OLD.as_millis() as u64,
        }
    }
}

impl VoteProcessorConfig {
    /// Create a minimal configuration for testing (1 worker thread).
    pub fn minimal() -> Self {
        Self {
            num_threads: 1,
            ..Default::default()
        }
    }

    /// Buffered-vote age limit.
    pub fn too_old(&self) -> Duration {
        Duration::from_millis(self.too_old_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == 0 {
            return Err(ConfigError::Invalid(
                "num_threads must be at least 1".to_string(),
            ));
        }
        if self.max_votes_per_connection == 0 {
            return Err(ConfigError::Invalid(
                "max_votes_per_connection must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VoteProcessorConfig::default();
        assert_eq!(config.max_votes_per_connection, 2500);
        assert_eq!(config.too_old(), Duration::from_secs(5));
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(VoteProcessorConfig::minimal().num_threads, 1);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = VoteProcessorConfig {
            num_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VoteProcessorConfig {
            max_votes_per_connection: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
