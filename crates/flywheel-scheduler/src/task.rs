//! Task definitions — the core data model for scheduled work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use flywheel_core::Result;

use crate::cron;

/// Execution priority. `Critical` always dispatches before `High`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Band index (lower = higher priority).
    pub fn rank(&self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Parse a config-file priority name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// When/how a task fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Schedule {
    /// Cron expression evaluated in the given timezone.
    Cron { expression: String, timezone: Tz },
    /// Fixed interval between fires.
    Interval { every: Duration },
}

impl Schedule {
    /// Cron schedule evaluated in UTC.
    pub fn cron(expression: &str) -> Self {
        Schedule::Cron {
            expression: expression.to_string(),
            timezone: chrono_tz::UTC,
        }
    }

    /// Cron schedule evaluated in a specific timezone.
    pub fn cron_tz(expression: &str, timezone: Tz) -> Self {
        Schedule::Cron {
            expression: expression.to_string(),
            timezone,
        }
    }

    /// Fire at a fixed interval.
    pub fn interval(every: Duration) -> Self {
        Schedule::Interval { every }
    }

    /// Next fire time strictly after `after`, or `None` if the schedule
    /// never fires again.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron {
                expression,
                timezone,
            } => cron::next_fire(expression, *timezone, after),
            Schedule::Interval { every } => {
                Some(after + chrono::Duration::from_std(*every).ok()?)
            }
        }
    }

    /// Check the schedule is well-formed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Schedule::Cron { expression, .. } => cron::validate(expression),
            Schedule::Interval { every } => {
                if every.is_zero() {
                    Err(flywheel_core::FlywheelError::Validation(
                        "interval must be non-zero".into(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Cron {
                expression,
                timezone,
            } => write!(f, "cron '{expression}' ({timezone})"),
            Schedule::Interval { every } => write!(f, "every {every:?}"),
        }
    }
}

/// A registered task. Immutable from the engine's side except through
/// explicit update calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique id across the registry.
    pub id: String,
    pub description: String,
    pub schedule: Schedule,
    pub priority: Priority,
    /// Per-task timeout; engine default applies when `None`.
    pub timeout: Option<Duration>,
    /// Per-task retry limit; engine default applies when `None`.
    pub retry_limit: Option<u32>,
    pub enabled: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            schedule,
            priority: Priority::Normal,
            timeout: None,
            retry_limit: None,
            enabled: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Check id and schedule before the registry accepts the definition.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(flywheel_core::FlywheelError::Validation(
                "task id must not be empty".into(),
            ));
        }
        self.schedule.validate()
    }
}

/// Lifecycle state of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Stopped,
    Scheduled,
    Queued,
    Running,
    Retrying,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Stopped => write!(f, "stopped"),
            TaskState::Scheduled => write!(f, "scheduled"),
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Retrying => write!(f, "retrying"),
        }
    }
}

/// The final error of a retry-exhausted cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Mutable runtime state, owned exclusively by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRuntimeState {
    pub id: String,
    pub state: TaskState,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fire_at: Option<DateTime<Utc>>,
    /// Completed cycles (one per fire, regardless of internal attempts).
    pub executions: u64,
    /// Retry-exhausted cycles.
    pub failures: u64,
    pub total_execution_ms: u64,
    pub last_error: Option<LastError>,
}

impl TaskRuntimeState {
    pub fn new(id: &str, state: TaskState, next_fire_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.to_string(),
            state,
            next_fire_at,
            last_fire_at: None,
            executions: 0,
            failures: 0,
            total_execution_ms: 0,
            last_error: None,
        }
    }

    /// Percentage of successful cycles in `[0, 100]`, or `None` before the
    /// first execution.
    pub fn success_rate(&self) -> Option<f64> {
        if self.executions == 0 {
            return None;
        }
        let ok = self.executions.saturating_sub(self.failures) as f64;
        Some(ok / self.executions as f64 * 100.0)
    }
}

/// What one attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One attempt, as fed to the metrics aggregator and the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: String,
    /// 1-based attempt number within the cycle.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub message: Option<String>,
}

impl ExecutionRecord {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Listing filters supported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Running,
    Stopped,
    PriorityAtLeast(Priority),
}

impl TaskFilter {
    pub(crate) fn matches(&self, state: TaskState, priority: Priority) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Running => matches!(state, TaskState::Running | TaskState::Retrying),
            TaskFilter::Stopped => state == TaskState::Stopped,
            TaskFilter::PriorityAtLeast(min) => priority.rank() <= min.rank(),
        }
    }
}

/// A task body: the single capability the engine invokes. The engine never
/// inspects what a body does; it only observes the result.
///
/// The cancellation token is cooperative — bodies that ignore it simply run
/// to completion or until their timeout.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> std::result::Result<(), String>;
}

/// Adapter wrapping a plain async closure as a [`TaskBody`].
pub struct FnBody<F>(F);

impl<F> FnBody<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> TaskBody for FnBody<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = std::result::Result<(), String>> + Send,
{
    async fn run(&self, _cancel: CancellationToken) -> std::result::Result<(), String> {
        (self.0)().await
    }
}

/// Source of truth for task definitions, consulted by `restart()`.
/// The engine does not own persistence; whoever does implements this.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn load(&self) -> Result<Vec<(TaskDefinition, Arc<dyn TaskBody>)>>;
}
