//! Tunables for the three services.
//!
//! Every struct has production defaults and deserializes with `serde`, so a
//! host application can embed them in its own configuration file and only
//! override what it needs.

use core::time::Duration;
use serde::Deserialize;

/// A configuration value that cannot work.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("invalid default number format: {reason}")]
    Template { reason: String },
}

/// Progress tracker timing and buffering.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Quiet period after which a non-terminal session times out.
    pub default_timeout: Duration,
    /// Delay before a completed or failed session is evicted.
    pub terminal_eviction: Duration,
    /// Delay before a cancelled session is evicted. Short, but long enough for
    /// in-flight subscribers to observe the final event.
    pub cancelled_eviction: Duration,
    /// How often the stale-session sweep runs.
    pub reap_interval: Duration,
    /// Sessions untouched for longer than this are reaped regardless of state.
    pub max_session_age: Duration,
    /// Per-session broadcast buffer. Subscribers that fall further behind are
    /// dropped.
    pub channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5 * 60),
            terminal_eviction: Duration::from_secs(60),
            cancelled_eviction: Duration::from_secs(1),
            reap_interval: Duration::from_secs(5 * 60),
            max_session_age: Duration::from_secs(30 * 60),
            channel_capacity: 64,
        }
    }
}

impl TrackerConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero timeout or channel capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "default_timeout",
            });
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "reap_interval",
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "channel_capacity",
            });
        }
        Ok(())
    }
}

/// Certificate numbering cache and conflict handling.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NumberingConfig {
    /// Lifetime of an idempotency cache entry.
    pub cache_ttl: Duration,
    /// Store transactions attempted before surfacing a conflict.
    pub max_conflict_attempts: u32,
    /// The wait before attempt `n + 1` is `conflict_backoff * n`.
    pub conflict_backoff: Duration,
    /// Template used when a request does not carry one.
    pub default_template: String,
    /// First sequence of a fresh `(entity, year)` pair when the request does
    /// not carry a start number.
    pub default_start_number: u64,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            max_conflict_attempts: 3,
            conflict_backoff: Duration::from_millis(100),
            default_template: crate::numbering::DEFAULT_TEMPLATE.to_string(),
            default_start_number: 1,
        }
    }
}

impl NumberingConfig {
    /// # Errors
    ///
    /// Returns an error for a zero attempt budget or start number, or a
    /// default template missing a required token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_conflict_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_conflict_attempts",
            });
        }
        if self.default_start_number == 0 {
            return Err(ConfigError::Zero {
                field: "default_start_number",
            });
        }
        crate::numbering::validate_template(&self.default_template).map_err(|e| {
            ConfigError::Template {
                reason: e.message,
            }
        })
    }
}

/// Retry executor defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}
