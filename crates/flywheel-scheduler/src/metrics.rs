//! Metrics Aggregator — global execution counters and the recent-execution
//! log backing the dashboard stream.
//!
//! Per-task counters live in each task's runtime state; this aggregator
//! owns everything cross-task. Readers take a read lock and never block
//! the execution pipeline for long — every critical section is a few
//! counter updates.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::task::{ExecutionRecord, Outcome};

/// Most recent retry-exhausted failure across all tasks.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalLastError {
    pub task_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time snapshot of the global counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Completed cycles, any outcome.
    pub tasks_executed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub uptime_secs: u64,
    pub last_error: Option<GlobalLastError>,
}

struct MetricsState {
    tasks_executed: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    last_error: Option<GlobalLastError>,
    log: VecDeque<ExecutionRecord>,
}

/// Consumes execution records; read by the facade for stats.
pub struct Metrics {
    started_at: DateTime<Utc>,
    capacity: usize,
    state: RwLock<MetricsState>,
}

impl Metrics {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            started_at: Utc::now(),
            capacity: log_capacity.max(1),
            state: RwLock::new(MetricsState {
                tasks_executed: 0,
                tasks_completed: 0,
                tasks_failed: 0,
                last_error: None,
                log: VecDeque::new(),
            }),
        }
    }

    /// Record one attempt into the bounded execution log.
    pub async fn record_attempt(&self, record: ExecutionRecord) {
        let mut state = self.state.write().await;
        if state.log.len() == self.capacity {
            state.log.pop_front();
        }
        state.log.push_back(record);
    }

    /// Record a settled cycle. Failure here means retry-exhausted — the
    /// retry policy absorbed everything before it.
    pub async fn record_cycle(&self, task_id: &str, outcome: Outcome, message: Option<&str>) {
        let mut state = self.state.write().await;
        state.tasks_executed += 1;
        match outcome {
            Outcome::Success => state.tasks_completed += 1,
            Outcome::Failure | Outcome::Timeout => {
                state.tasks_failed += 1;
                state.last_error = Some(GlobalLastError {
                    task_id: task_id.to_string(),
                    message: message.unwrap_or("task failed").to_string(),
                    at: Utc::now(),
                });
            }
            Outcome::Cancelled => {}
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().await;
        MetricsSnapshot {
            tasks_executed: state.tasks_executed,
            tasks_completed: state.tasks_completed,
            tasks_failed: state.tasks_failed,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            last_error: state.last_error.clone(),
        }
    }

    /// Newest-first slice of the execution log.
    pub async fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        state.log.iter().rev().take(limit).cloned().collect()
    }
}
