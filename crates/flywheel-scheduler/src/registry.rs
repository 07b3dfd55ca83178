//! Task Registry — single source of truth for definition + runtime pairs.
//!
//! All mutation goes through one `RwLock`; listing and stats take read
//! locks, registration and the execution pipeline take write locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use flywheel_core::{FlywheelError, Result};

use crate::task::{
    LastError, Outcome, Priority, TaskBody, TaskDefinition, TaskFilter, TaskRuntimeState,
    TaskState,
};

struct Entry {
    def: TaskDefinition,
    runtime: TaskRuntimeState,
    body: Arc<dyn TaskBody>,
    /// Token for the current cycle. Replaced on every fire; cancelled on
    /// stop/unregister so a running body gets the cooperative signal.
    cancel: CancellationToken,
}

/// Everything the worker pool needs to run one cycle.
pub(crate) struct CycleHandle {
    pub body: Arc<dyn TaskBody>,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
    pub retry_limit: Option<u32>,
}

/// In-memory catalog of registered tasks.
pub struct Registry {
    tasks: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a task. Fails with a validation error on a duplicate id, a
    /// malformed schedule, or a schedule with no future fire time.
    pub async fn register(&self, def: TaskDefinition, body: Arc<dyn TaskBody>) -> Result<()> {
        def.validate()?;
        let now = Utc::now();
        let next = def.schedule.next_fire(now).ok_or_else(|| {
            FlywheelError::Validation(format!(
                "schedule for '{}' has no future fire time",
                def.id
            ))
        })?;

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&def.id) {
            return Err(FlywheelError::Validation(format!(
                "task id '{}' already registered",
                def.id
            )));
        }

        let (state, next_fire_at) = if def.enabled {
            (TaskState::Scheduled, Some(next))
        } else {
            (TaskState::Stopped, None)
        };
        let runtime = TaskRuntimeState::new(&def.id, state, next_fire_at);
        tracing::info!("📅 Task registered: '{}' ({})", def.id, def.schedule);
        tasks.insert(
            def.id.clone(),
            Entry {
                def,
                runtime,
                body,
                cancel: CancellationToken::new(),
            },
        );
        Ok(())
    }

    /// Remove a task. An in-flight cycle gets the cancellation signal and
    /// its outcome is discarded when it settles.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.remove(id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!("🗑️ Task unregistered: '{id}'");
                Ok(())
            }
            None => Err(FlywheelError::NotFound(id.to_string())),
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<TaskRuntimeState> {
        self.tasks.read().await.get(id).map(|e| e.runtime.clone())
    }

    pub async fn definition(&self, id: &str) -> Option<TaskDefinition> {
        self.tasks.read().await.get(id).map(|e| e.def.clone())
    }

    pub async fn priority_of(&self, id: &str) -> Option<Priority> {
        self.tasks.read().await.get(id).map(|e| e.def.priority)
    }

    /// List runtime states, stable-ordered by id.
    pub async fn list(&self, filter: TaskFilter) -> Vec<TaskRuntimeState> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<TaskRuntimeState> = tasks
            .values()
            .filter(|e| filter.matches(e.runtime.state, e.def.priority))
            .map(|e| e.runtime.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.tasks.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn count_state(&self, state: TaskState) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|e| e.runtime.state == state)
            .count()
    }

    pub async fn count_enabled(&self) -> usize {
        self.tasks.read().await.values().filter(|e| e.def.enabled).count()
    }

    pub async fn enabled_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|e| e.def.enabled)
            .map(|e| e.def.id.clone())
            .collect()
    }

    /// Enable or disable a task. Enabling recomputes the next fire from
    /// "now"; disabling clears it and signals a running cycle to wind down.
    /// Returns false when the id is unknown.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(id) else {
            return false;
        };
        entry.def.enabled = enabled;
        if enabled {
            if entry.runtime.state == TaskState::Stopped {
                entry.runtime.state = TaskState::Scheduled;
            }
            entry.runtime.next_fire_at = entry.def.schedule.next_fire(Utc::now());
            tracing::info!("▶️ Task enabled: '{id}'");
        } else {
            entry.runtime.next_fire_at = None;
            match entry.runtime.state {
                // A queued/running cycle finishes on its own and settles to
                // Stopped in finish_cycle; the signal is cooperative only.
                TaskState::Running | TaskState::Retrying => entry.cancel.cancel(),
                TaskState::Queued => {}
                _ => entry.runtime.state = TaskState::Stopped,
            }
            tracing::info!("⏸️ Task disabled: '{id}'");
        }
        true
    }

    /// Tasks whose next fire is due. The clock submits these and then
    /// advances their fire times.
    pub async fn due_tasks(&self, now: DateTime<Utc>) -> Vec<(String, Priority)> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|e| {
                e.def.enabled
                    && e.runtime.state == TaskState::Scheduled
                    && e.runtime.next_fire_at.is_some_and(|t| t <= now)
            })
            .map(|e| (e.def.id.clone(), e.def.priority))
            .collect()
    }

    /// Advance a task's next fire strictly past `now`. Missed intervals
    /// collapse into this single recomputation — a stalled clock never owes
    /// a backlog of fires.
    pub async fn advance_next_fire(&self, id: &str, now: DateTime<Utc>) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(id)
            && entry.def.enabled
        {
            entry.runtime.next_fire_at = entry.def.schedule.next_fire(now);
        }
    }

    /// Scheduled → Queued on dispatch submission. Disabled tasks still
    /// transition here when fired via execute-now.
    pub async fn mark_queued(&self, id: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(id)
            && matches!(
                entry.runtime.state,
                TaskState::Scheduled | TaskState::Stopped
            )
        {
            entry.runtime.state = TaskState::Queued;
        }
    }

    /// Start a cycle: fresh cancellation token, Running state, fire stamp.
    /// Returns `None` when the task was unregistered while queued.
    pub(crate) async fn begin_cycle(&self, id: &str, now: DateTime<Utc>) -> Option<CycleHandle> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(id)?;
        entry.cancel = CancellationToken::new();
        entry.runtime.state = TaskState::Running;
        entry.runtime.last_fire_at = Some(now);
        Some(CycleHandle {
            body: entry.body.clone(),
            cancel: entry.cancel.clone(),
            timeout: entry.def.timeout,
            retry_limit: entry.def.retry_limit,
        })
    }

    pub async fn mark_retrying(&self, id: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(id) {
            entry.runtime.state = TaskState::Retrying;
        }
    }

    pub async fn mark_running(&self, id: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(id) {
            entry.runtime.state = TaskState::Running;
        }
    }

    /// Settle a finished cycle: one execution counted regardless of attempt
    /// count, failure counters and last_error on retry exhaustion, state
    /// back to Scheduled (or Stopped when disabled meanwhile). Returns
    /// false when the task was unregistered mid-cycle, in which case the
    /// caller discards the outcome.
    pub async fn finish_cycle(
        &self,
        id: &str,
        outcome: Outcome,
        duration_ms: u64,
        error: Option<(String, String)>,
    ) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(id) else {
            return false;
        };
        entry.runtime.executions += 1;
        entry.runtime.total_execution_ms += duration_ms;
        if matches!(outcome, Outcome::Failure | Outcome::Timeout) {
            entry.runtime.failures += 1;
        }
        if let Some((kind, message)) = error {
            entry.runtime.last_error = Some(LastError {
                kind,
                message,
                at: Utc::now(),
            });
        }
        entry.runtime.state = if entry.def.enabled {
            TaskState::Scheduled
        } else {
            TaskState::Stopped
        };
        true
    }

    /// Reset runtime state for every task, keeping definitions. Used by
    /// `restart()` when no external task source is injected.
    pub async fn reset_runtime(&self) {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        for entry in tasks.values_mut() {
            entry.cancel.cancel();
            entry.cancel = CancellationToken::new();
            let (state, next) = if entry.def.enabled {
                (TaskState::Scheduled, entry.def.schedule.next_fire(now))
            } else {
                (TaskState::Stopped, None)
            };
            entry.runtime = TaskRuntimeState::new(&entry.def.id, state, next);
        }
    }

    /// Replace the whole catalog with freshly loaded definitions.
    pub async fn replace_all(
        &self,
        defs: Vec<(TaskDefinition, Arc<dyn TaskBody>)>,
    ) -> Result<()> {
        {
            let mut tasks = self.tasks.write().await;
            for entry in tasks.values() {
                entry.cancel.cancel();
            }
            tasks.clear();
        }
        for (def, body) in defs {
            self.register(def, body).await?;
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
