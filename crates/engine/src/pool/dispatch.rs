//! Bounded execution pool for workers
//!
//! Runs submitted tasks on a fixed number of execution slots, counts
//! completions atomically and supports graceful draining.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::backpressure::{AdmissionControl, AdmissionRefusal, BackpressureConfig, BackpressureError};

/// Execution pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrently running tasks
    pub max_concurrency: usize,

    /// Admission backpressure for new work orders
    #[serde(default)]
    pub backpressure: BackpressureConfig,

    /// How long shutdown waits for in-flight tasks
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            backpressure: BackpressureConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set backpressure configuration
    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        self.backpressure.validate()?;
        Ok(())
    }
}

/// Execution pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Accepting tasks
    Running,
    /// Finishing in-flight tasks, refusing new ones
    Draining,
    /// Every task finished after a shutdown
    Stopped,
}

/// Execution pool errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// Work order admission is closed by the watermarks
    #[error("execution pool saturated: {in_flight} tasks in flight for {max_concurrency} slots, {reason}")]
    Saturated {
        in_flight: usize,
        max_concurrency: usize,
        reason: AdmissionRefusal,
    },

    /// Pool is draining or stopped
    #[error("execution pool is shutting down")]
    ShuttingDown,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {remaining} tasks in flight")]
    ShutdownTimeout { remaining: usize },

    /// A completion wait ran out of time
    #[error("timed out waiting for {target} completions ({completed} completed)")]
    WaitTimeout { target: u64, completed: u64 },

    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl From<BackpressureError> for PoolError {
    fn from(e: BackpressureError) -> Self {
        match e {
            BackpressureError::InvalidConfig(msg) => Self::InvalidConfig(msg),
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    completion: Notify,
}

/// Counts a task as completed when dropped, so a panicking task still
/// releases its load and wakes waiters
struct CompletionGuard {
    counters: Arc<Counters>,
    admission: Arc<AdmissionControl>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.admission.task_completed();
        self.counters.completed.fetch_add(1, Ordering::AcqRel);
        self.counters.completion.notify_waiters();
    }
}

/// Bounded pool running worker tasks
///
/// # Example
///
/// ```
/// use tessera_engine::pool::{ExecutionPool, PoolConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ExecutionPool::new(PoolConfig::new().with_max_concurrency(4))?;
///
/// for _ in 0..3 {
///     pool.submit(async { /* run a worker */ })?;
/// }
/// pool.wait_for_completions(3, None).await?;
///
/// pool.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ExecutionPool {
    config: PoolConfig,
    admission: Arc<AdmissionControl>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
    status: RwLock<PoolStatus>,
}

impl ExecutionPool {
    /// Create a pool; must be used from within a tokio runtime
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let admission = Arc::new(AdmissionControl::new(
            config.backpressure.clone(),
            config.max_concurrency,
        ));

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            admission,
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
            status: RwLock::new(PoolStatus::Running),
        })
    }

    /// Check whether a new work order may be admitted
    pub fn check_admission(&self) -> Result<(), PoolError> {
        if self.status() != PoolStatus::Running {
            return Err(PoolError::ShuttingDown);
        }
        if let Err(reason) = self.admission.admit() {
            debug!(%reason, "Refusing work order admission");
            return Err(PoolError::Saturated {
                in_flight: self.admission.in_flight(),
                max_concurrency: self.config.max_concurrency,
                reason,
            });
        }
        Ok(())
    }

    /// Submit a task, returning its submission sequence number
    ///
    /// The task waits for a free slot before it starts. Submission fails
    /// only when the pool is draining or stopped.
    pub fn submit<F>(&self, task: F) -> Result<u64, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.status() != PoolStatus::Running {
            return Err(PoolError::ShuttingDown);
        }

        let sequence = self.counters.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        self.admission.task_started();

        let guard = CompletionGuard {
            counters: Arc::clone(&self.counters),
            admission: Arc::clone(&self.admission),
        };
        let slots = Arc::clone(&self.slots);

        self.tracker.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = slots.acquire_owned().await else {
                warn!(sequence, "Execution slots closed before task started");
                return;
            };
            task.await;
        });

        Ok(sequence)
    }

    /// Wait until at least `target` tasks have completed
    ///
    /// Returns the completed count observed. With a timeout, fails with
    /// [`PoolError::WaitTimeout`] if the count is not reached in time.
    pub async fn wait_for_completions(
        &self,
        target: u64,
        timeout: Option<Duration>,
    ) -> Result<u64, PoolError> {
        let wait = async {
            loop {
                let notified = self.counters.completion.notified();
                tokio::pin!(notified);
                // register before reading the counter so a completion in
                // between is not missed
                notified.as_mut().enable();

                let completed = self.completed_count();
                if completed >= target {
                    return completed;
                }
                notified.await;
            }
        };

        match timeout {
            None => Ok(wait.await),
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| PoolError::WaitTimeout {
                    target,
                    completed: self.completed_count(),
                }),
        }
    }

    /// Stop accepting tasks and wait for in-flight ones to finish
    #[instrument(skip(self), fields(max_concurrency = self.config.max_concurrency))]
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        {
            let mut status = self.status.write();
            if *status == PoolStatus::Stopped {
                return Ok(());
            }
            *status = PoolStatus::Draining;
        }

        info!(in_flight = self.in_flight(), "Draining execution pool");
        self.tracker.close();

        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            let remaining = self.in_flight();
            warn!(remaining, "Shutdown timeout reached");
            return Err(PoolError::ShutdownTimeout { remaining });
        }

        *self.status.write() = PoolStatus::Stopped;
        info!(
            completed = self.completed_count(),
            "Execution pool stopped"
        );
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.read()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn submitted_count(&self) -> u64 {
        self.counters.submitted.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> u64 {
        self.counters.completed.load(Ordering::Acquire)
    }

    /// Tasks submitted but not yet completed
    pub fn in_flight(&self) -> usize {
        self.admission.in_flight()
    }

    /// Whether new work orders would currently be admitted
    pub fn is_accepting(&self) -> bool {
        self.status() == PoolStatus::Running && self.admission.is_open()
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("status", &self.status())
            .field("max_concurrency", &self.config.max_concurrency)
            .field("in_flight", &self.in_flight())
            .field("completed", &self.completed_count())
            .finish()
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
