//! # Flywheel Scheduler
//!
//! In-process recurring task engine: cron and interval triggers, priority
//! dispatch, a bounded worker pool, and per-task plus global metrics.
//! Everything lives in memory — zero overhead when idle, nothing to
//! provision.
//!
//! ## Architecture
//! ```text
//! Trigger Clock (tokio interval, catch-up collapsed)
//!   └── tick → Registry.due_tasks() sorted by priority
//!         └── Dispatch Queue (4 FIFO bands, coalescing in-flight fires)
//!               └── Worker Pool (semaphore-bounded)
//!                     ├── attempt with timeout + panic containment
//!                     ├── fixed-backoff retries up to the task's limit
//!                     └── settle → Registry + Metrics Aggregator
//!
//! Scheduler (facade)
//!   ├── schedule / remove / start / stop / execute_now
//!   ├── pause_all / resume_all / restart / cleanup
//!   └── stats / list / recent_executions
//! ```

pub mod cron;
pub mod engine;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod task;

pub use engine::{Scheduler, SchedulerStats};
pub use metrics::{GlobalLastError, MetricsSnapshot};
pub use queue::DispatchRequest;
pub use task::{
    ExecutionRecord, FnBody, LastError, Outcome, Priority, Schedule, TaskBody, TaskDefinition,
    TaskFilter, TaskRuntimeState, TaskSource, TaskState,
};
