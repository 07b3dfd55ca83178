//! Flywheel error taxonomy.
//!
//! Control-call misses (unknown task id) are deliberately NOT errors — the
//! facade returns `false` for those so callers can render a plain failure
//! message. `NotFound` exists for registry writes where the caller must know.

use std::time::Duration;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, FlywheelError>;

/// All errors the scheduler engine can surface.
#[derive(Debug, thiserror::Error)]
pub enum FlywheelError {
    /// Bad schedule expression, duplicate id, or invalid config value.
    /// Surfaced synchronously at registration time, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown task id in a registry write.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task body reported failure. Absorbed by the retry policy; only the
    /// retry-exhausted failure reaches `last_error`.
    #[error("execution failed: {0}")]
    Execution(String),

    /// An attempt exceeded its deadline.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Control call issued after the engine was torn down.
    #[error("scheduler is stopped")]
    SchedulerStopped,

    /// Configuration file problems.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlywheelError {
    /// Short machine-readable kind, used in `last_error` reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            FlywheelError::Validation(_) => "validation",
            FlywheelError::NotFound(_) => "not_found",
            FlywheelError::Execution(_) => "execution",
            FlywheelError::Timeout(_) => "timeout",
            FlywheelError::SchedulerStopped => "scheduler_stopped",
            FlywheelError::Config(_) => "config",
            FlywheelError::Io(_) => "io",
        }
    }
}
