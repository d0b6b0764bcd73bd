// Engine Configuration
//
// Configuration for the orchestration engine, with defaults suitable for
// embedding and an environment loader for hosted deployments.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::{BackpressureConfig, PoolConfig, PoolError};

/// Default capacity of the event subscriber channel
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Events buffered per subscriber before slow subscribers lag
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TESSERA_MAX_CONCURRENCY`: execution slots (default: 10)
    /// - `TESSERA_SHUTDOWN_TIMEOUT_MS`: graceful shutdown budget (default: 30000)
    /// - `TESSERA_EVENT_BUFFER`: subscriber channel capacity (default: 1024)
    /// - `TESSERA_HIGH_WATERMARK`: admission high watermark (default: 0.9)
    /// - `TESSERA_LOW_WATERMARK`: admission low watermark (default: 0.7)
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        let pool = defaults.pool;

        let max_concurrency =
            parsed(&lookup, "TESSERA_MAX_CONCURRENCY").unwrap_or(pool.max_concurrency);
        let shutdown_timeout = parsed(&lookup, "TESSERA_SHUTDOWN_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(pool.shutdown_timeout);
        let backpressure = BackpressureConfig::new()
            .with_high_watermark(
                parsed(&lookup, "TESSERA_HIGH_WATERMARK")
                    .unwrap_or(pool.backpressure.high_watermark),
            )
            .with_low_watermark(
                parsed(&lookup, "TESSERA_LOW_WATERMARK")
                    .unwrap_or(pool.backpressure.low_watermark),
            );
        let event_buffer =
            parsed(&lookup, "TESSERA_EVENT_BUFFER").unwrap_or(defaults.event_buffer);

        Self {
            pool: PoolConfig::new()
                .with_max_concurrency(max_concurrency)
                .with_shutdown_timeout(shutdown_timeout)
                .with_backpressure(backpressure),
            event_buffer,
        }
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.pool = self.pool.with_max_concurrency(max);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.pool = self.pool.with_shutdown_timeout(timeout);
        self
    }

    /// Set backpressure configuration
    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.pool = self.pool.with_backpressure(config);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        self.pool.validate()
    }
}
