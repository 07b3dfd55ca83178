//! Worker Pool — bounded execution slots with timeout and retry policy.
//!
//! The semaphore is the single concurrency-limiting resource: a cycle
//! holds one permit from its first attempt until its last, including
//! retry backoff, so `max_concurrent_tasks` is never exceeded.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use flywheel_core::{FlywheelError, SchedulerConfig};

use crate::metrics::Metrics;
use crate::queue::{DispatchQueue, DispatchRequest};
use crate::registry::Registry;
use crate::task::{ExecutionRecord, Outcome, TaskBody};

struct PoolDefaults {
    timeout: Duration,
    retry_limit: u32,
    backoff: Duration,
}

/// Executes dispatch requests under the concurrency bound.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    /// Currently configured permit count, for live resizing.
    size: Mutex<usize>,
    defaults: RwLock<PoolDefaults>,
    registry: Arc<Registry>,
    queue: Arc<DispatchQueue>,
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    pub fn new(
        config: &SchedulerConfig,
        registry: Arc<Registry>,
        queue: Arc<DispatchQueue>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            size: Mutex::new(config.max_concurrent_tasks),
            defaults: RwLock::new(PoolDefaults {
                timeout: Duration::from_secs(config.default_timeout_secs),
                retry_limit: config.default_retry_attempts,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            }),
            registry,
            queue,
            metrics,
        }
    }

    /// Grab a free slot without waiting.
    pub fn try_acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Apply a config update: resize the permit count and swap defaults.
    /// Shrinking takes effect as running cycles release their permits.
    pub async fn apply_config(&self, config: &SchedulerConfig) {
        let mut size = self.size.lock().await;
        if config.max_concurrent_tasks > *size {
            self.semaphore.add_permits(config.max_concurrent_tasks - *size);
        } else if config.max_concurrent_tasks < *size {
            self.semaphore
                .forget_permits(*size - config.max_concurrent_tasks);
        }
        *size = config.max_concurrent_tasks;
        drop(size);

        let mut defaults = self.defaults.write().await;
        defaults.timeout = Duration::from_secs(config.default_timeout_secs);
        defaults.retry_limit = config.default_retry_attempts;
        defaults.backoff = Duration::from_millis(config.retry_backoff_ms);
    }

    /// Spawn one execution cycle on the runtime. The permit travels with
    /// the cycle and is released when it settles.
    pub fn spawn_cycle(self: &Arc<Self>, req: DispatchRequest, permit: OwnedSemaphorePermit) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_cycle(req, permit).await;
        });
    }

    /// One full cycle: attempts with timeout, fixed-backoff retries, then
    /// settle. Nothing a body does — error, panic, overrun — escapes here.
    pub async fn run_cycle(self: Arc<Self>, req: DispatchRequest, permit: OwnedSemaphorePermit) {
        let task_id = req.task_id;
        let Some(handle) = self.registry.begin_cycle(&task_id, Utc::now()).await else {
            // Unregistered while queued
            drop(permit);
            self.queue.complete(&task_id).await;
            return;
        };

        let (timeout, retry_limit, backoff) = {
            let defaults = self.defaults.read().await;
            (
                handle.timeout.unwrap_or(defaults.timeout),
                handle.retry_limit.unwrap_or(defaults.retry_limit),
                defaults.backoff,
            )
        };

        let cycle_start = std::time::Instant::now();
        let mut attempt: u32 = 1;
        let (final_outcome, final_message) = loop {
            let started_at = Utc::now();
            let (outcome, message) =
                execute_attempt(&handle.body, timeout, &handle.cancel).await;
            self.metrics
                .record_attempt(ExecutionRecord {
                    task_id: task_id.clone(),
                    attempt,
                    started_at,
                    finished_at: Utc::now(),
                    outcome,
                    message: message.clone(),
                })
                .await;

            match outcome {
                Outcome::Success | Outcome::Cancelled => break (outcome, message),
                Outcome::Failure | Outcome::Timeout => {
                    if attempt <= retry_limit && !handle.cancel.is_cancelled() {
                        tracing::warn!(
                            "🔁 Task '{}' attempt {} {}; retrying in {:?}",
                            task_id,
                            attempt,
                            outcome,
                            backoff
                        );
                        attempt += 1;
                        self.registry.mark_retrying(&task_id).await;
                        tokio::time::sleep(backoff).await;
                        self.registry.mark_running(&task_id).await;
                    } else {
                        break (outcome, message);
                    }
                }
            }
        };

        let duration_ms = cycle_start.elapsed().as_millis() as u64;
        let error = match final_outcome {
            Outcome::Failure => Some(FlywheelError::Execution(
                final_message.clone().unwrap_or_else(|| "task failed".into()),
            )),
            Outcome::Timeout => Some(FlywheelError::Timeout(timeout)),
            _ => None,
        }
        .map(|e| {
            let message = match &e {
                FlywheelError::Execution(m) => m.clone(),
                other => other.to_string(),
            };
            (e.kind().to_string(), message)
        });

        let still_registered = self
            .registry
            .finish_cycle(&task_id, final_outcome, duration_ms, error)
            .await;
        if still_registered {
            self.metrics
                .record_cycle(&task_id, final_outcome, final_message.as_deref())
                .await;
            match final_outcome {
                Outcome::Success => {
                    tracing::debug!("✅ Task '{}' completed in {}ms", task_id, duration_ms)
                }
                Outcome::Cancelled => tracing::debug!("🚫 Task '{}' cancelled", task_id),
                _ => tracing::warn!(
                    "❌ Task '{}' failed after {} attempt(s): {}",
                    task_id,
                    attempt,
                    final_message.as_deref().unwrap_or("no message")
                ),
            }
        } else {
            tracing::debug!("Task '{}' unregistered mid-cycle; outcome discarded", task_id);
        }

        drop(permit);
        self.queue.complete(&task_id).await;
    }
}

/// Run one attempt: timeout-bounded and panic-isolated. The cancellation
/// token is only handed to the body, never raced against it — a body that
/// ignores the token runs to completion or until its timeout. A body that
/// observes the token and bails while it is cancelled settles as
/// `Cancelled` rather than `Failure`.
async fn execute_attempt(
    body: &Arc<dyn TaskBody>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> (Outcome, Option<String>) {
    let work = AssertUnwindSafe(body.run(cancel.clone())).catch_unwind();
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(Ok(()))) => (Outcome::Success, None),
        Ok(Ok(Err(message))) if cancel.is_cancelled() => (Outcome::Cancelled, Some(message)),
        Ok(Ok(Err(message))) => (Outcome::Failure, Some(message)),
        Ok(Err(_)) => (Outcome::Failure, Some("task body panicked".into())),
        Err(_) => (Outcome::Timeout, Some(format!("exceeded timeout of {timeout:?}"))),
    }
}
