// ABOUTME: Configuration for the real-time socket pool
//
// Defines PoolConfig with all tunable parameters for the pool manager:
// - Pool sizing (max connections per key, prewarm floor)
// - Timeouts for connection creation, waiting and idle eviction
// - Background loop intervals (metrics, cleanup)
// - Reconnection bounds handed to the transport

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::manager::PoolError;

/// Configuration for the socket pool manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections (active + idle + being created) per pool key
    pub max_size: usize,

    /// Idle connections `prewarm` tops a pool up to
    pub min_connections: usize,

    // === Timeouts ===
    /// Upper bound for creating a single connection
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,

    /// How long a queued waiter may wait for a connection
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,

    /// Idle connections older than this are evicted by the cleanup sweep
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    // === Background loops ===
    /// Interval between idle cleanup sweeps
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,

    /// Interval between metrics snapshots
    #[serde(with = "duration_millis")]
    pub metrics_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_connections: 2,

            connection_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),

            cleanup_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Builder-style override for `max_size`
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Builder-style override for `idle_timeout`
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Builder-style override for `acquire_timeout`
    #[must_use]
    pub const fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Check the configuration for values the manager cannot work with
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be at least 1".to_string()));
        }
        if self.min_connections > self.max_size {
            return Err(PoolError::Config(format!(
                "min_connections ({}) exceeds max_size ({})",
                self.min_connections, self.max_size
            )));
        }

        let intervals = [
            ("connection_timeout", self.connection_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("idle_timeout", self.idle_timeout),
            ("cleanup_interval", self.cleanup_interval),
            ("metrics_interval", self.metrics_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(PoolError::Config(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}

/// Reconnection bounds used by the transport when a connect attempt fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Total connect attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (exponential backoff base)
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Maximum delay between retries (exponential backoff cap)
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl ReconnectPolicy {
    /// Check the policy bounds
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_attempts == 0 {
            return Err(PoolError::Config(
                "reconnect.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(PoolError::Config(format!(
                "reconnect.base_delay ({:?}) exceeds reconnect.max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds (u64)
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
