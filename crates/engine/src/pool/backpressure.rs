//! Admission backpressure for the execution pool
//!
//! New work orders are admitted only while the pool's in-flight load is
//! below a high watermark; once tripped, admission resumes when the load
//! drains to the low watermark. Branch workers of running work orders are
//! never refused here.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backpressure configuration
///
/// Watermarks are ratios of in-flight tasks to `max_concurrency`. Tasks
/// waiting for an execution slot count as in flight.
///
/// # Example
///
/// ```
/// use tessera_engine::pool::BackpressureConfig;
///
/// let config = BackpressureConfig::default()
///     .with_high_watermark(0.85)
///     .with_low_watermark(0.65);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureConfig {
    /// Stop admitting work orders when load reaches this ratio
    pub high_watermark: f64,

    /// Resume admitting work orders when load drops to this ratio
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.9,
            low_watermark: 0.7,
        }
    }
}

impl BackpressureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the high watermark. Values above 1.0 allow queueing past the
    /// slot count.
    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.max(0.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.max(0.0);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BackpressureError> {
        if self.low_watermark >= self.high_watermark {
            return Err(BackpressureError::InvalidConfig(
                "low_watermark must be less than high_watermark".into(),
            ));
        }
        Ok(())
    }
}

/// Backpressure-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackpressureError {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Why a new work order was refused
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionRefusal {
    /// The load reached the high watermark with this request
    HighWatermark { load_ratio: f64, high_watermark: f64 },

    /// Admission closed earlier and the load has not drained to the low
    /// watermark yet
    Draining { load_ratio: f64, low_watermark: f64 },
}

impl fmt::Display for AdmissionRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighWatermark {
                load_ratio,
                high_watermark,
            } => write!(
                f,
                "load {:.0}% reached the {:.0}% high watermark",
                load_ratio * 100.0,
                high_watermark * 100.0
            ),
            Self::Draining {
                load_ratio,
                low_watermark,
            } => write!(
                f,
                "load {:.0}% has not drained to the {:.0}% low watermark",
                load_ratio * 100.0,
                low_watermark * 100.0
            ),
        }
    }
}

/// Work order admission over the pool's in-flight load
///
/// Every submitted task counts toward the load, branch workers included,
/// but only new work orders go through [`AdmissionControl::admit`].
pub struct AdmissionControl {
    config: BackpressureConfig,
    in_flight: AtomicUsize,
    max_concurrency: usize,
    closed: Mutex<bool>,
}

impl AdmissionControl {
    pub fn new(config: BackpressureConfig, max_concurrency: usize) -> Self {
        Self {
            config,
            in_flight: AtomicUsize::new(0),
            max_concurrency: max_concurrency.max(1),
            closed: Mutex::new(false),
        }
    }

    /// Admit or refuse one new work order
    ///
    /// Closes at the high watermark and stays closed until the load falls
    /// to the low watermark.
    pub fn admit(&self) -> Result<(), AdmissionRefusal> {
        let load_ratio = self.load_ratio();
        let mut closed = self.closed.lock();

        if *closed {
            if load_ratio > self.config.low_watermark {
                return Err(AdmissionRefusal::Draining {
                    load_ratio,
                    low_watermark: self.config.low_watermark,
                });
            }
            *closed = false;
            debug!(load_ratio, "Work order admission reopened");
        }

        if load_ratio >= self.config.high_watermark {
            *closed = true;
            debug!(load_ratio, "Work order admission closed");
            return Err(AdmissionRefusal::HighWatermark {
                load_ratio,
                high_watermark: self.config.high_watermark,
            });
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !*self.closed.lock()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// In-flight tasks per execution slot
    pub fn load_ratio(&self) -> f64 {
        self.in_flight() as f64 / self.max_concurrency as f64
    }

    pub fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn task_completed(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
