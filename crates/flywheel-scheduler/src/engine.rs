//! Scheduler Engine — the facade and its two background loops.
//!
//! One trigger-clock loop finds due tasks once per tick and submits them in
//! priority order; one dispatch loop moves queued requests into worker
//! slots. Everything else is control surface: registration, start/stop,
//! execute-now, listing, stats, and the bulk operations used by the
//! management side.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use flywheel_core::{FlywheelError, Result, SchedulerConfig};

use crate::metrics::{GlobalLastError, Metrics};
use crate::pool::WorkerPool;
use crate::queue::DispatchQueue;
use crate::registry::Registry;
use crate::task::{
    ExecutionRecord, TaskBody, TaskDefinition, TaskFilter, TaskRuntimeState, TaskSource,
};

/// Aggregated engine health, rendered by the command layer and dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    /// Tasks currently holding a worker slot (running or retrying).
    pub running: usize,
    pub queued: usize,
    pub max_concurrent_tasks: usize,
    pub tasks_executed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub uptime_secs: u64,
    pub last_error: Option<GlobalLastError>,
}

/// The scheduler engine. Constructed once by the process entry point and
/// shared by handle — never a module-level singleton.
pub struct Scheduler {
    registry: Arc<Registry>,
    queue: Arc<DispatchQueue>,
    pool: Arc<WorkerPool>,
    metrics: Arc<Metrics>,
    config: RwLock<SchedulerConfig>,
    source: Option<Arc<dyn TaskSource>>,
    /// Ids disabled by the last `pause_all`, so `resume_all` restores the
    /// exact pre-pause enabled set.
    paused: Mutex<Option<HashSet<String>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Construct with a task source backing `restart()`.
    pub fn with_source(config: SchedulerConfig, source: Arc<dyn TaskSource>) -> Result<Arc<Self>> {
        Self::build(config, Some(source))
    }

    fn build(config: SchedulerConfig, source: Option<Arc<dyn TaskSource>>) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(Registry::new());
        let queue = Arc::new(DispatchQueue::new());
        let metrics = Arc::new(Metrics::new(config.execution_log_capacity));
        let pool = Arc::new(WorkerPool::new(
            &config,
            registry.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        Ok(Arc::new(Self {
            registry,
            queue,
            pool,
            metrics,
            config: RwLock::new(config),
            source,
            paused: Mutex::new(None),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }))
    }

    /// Spawn the trigger clock and dispatch loops. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let tick_ms = self.config.read().await.tick_interval_ms;
        tracing::info!("⏰ Scheduler started (tick every {tick_ms}ms)");

        // Trigger clock
        let sched = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(tick_ms));
            // A stalled clock owes at most one catch-up tick, never a storm.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sched.shutdown.cancelled() => break,
                    _ = interval.tick() => sched.tick().await,
                }
            }
            tracing::debug!("Trigger clock stopped");
        });

        // Dispatch loop
        let sched = self.clone();
        tokio::spawn(async move {
            loop {
                sched.drain_queue().await;
                tokio::select! {
                    _ = sched.shutdown.cancelled() => break,
                    _ = sched.queue.notified() => {}
                }
            }
            tracing::debug!("Dispatch loop stopped");
        });
    }

    /// Tear the engine down. In-flight cycles get the cooperative signal;
    /// control calls fail with `SchedulerStopped` afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("🛑 Scheduler shutting down");
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// One clock tick: submit every due task in priority order, then
    /// advance each fire time strictly past "now".
    async fn tick(&self) {
        let now = Utc::now();
        let mut due = self.registry.due_tasks(now).await;
        if due.is_empty() {
            return;
        }
        due.sort_by_key(|(_, priority)| priority.rank());
        for (id, priority) in due {
            tracing::debug!("🔔 Task due: '{id}' ({priority})");
            if self.queue.submit(&id, priority).await {
                self.registry.mark_queued(&id).await;
            }
            self.registry.advance_next_fire(&id, now).await;
        }
    }

    /// Hand queued requests to free worker slots until either runs out.
    async fn drain_queue(&self) {
        loop {
            let Some(permit) = self.pool.try_acquire_slot() else {
                return;
            };
            match self.queue.pop().await {
                Some(req) => self.pool.spawn_cycle(req, permit),
                None => {
                    drop(permit);
                    return;
                }
            }
        }
    }

    // ---- registration ----------------------------------------------------

    /// Register a recurring job. Generates an id when the definition's id
    /// is empty; fails on duplicate ids or unparsable schedules.
    pub async fn schedule_task(
        &self,
        mut def: TaskDefinition,
        body: Arc<dyn TaskBody>,
    ) -> Result<String> {
        if self.shutdown.is_cancelled() {
            return Err(FlywheelError::SchedulerStopped);
        }
        if def.id.is_empty() {
            def.id = format!("task-{}", uuid::Uuid::new_v4().simple());
        }
        let id = def.id.clone();
        self.registry.register(def, body).await?;
        Ok(id)
    }

    /// Remove a task. An in-flight cycle completes but its outcome is
    /// discarded.
    pub async fn remove_task(&self, id: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(FlywheelError::SchedulerStopped);
        }
        self.registry.unregister(id).await
    }

    // ---- control calls (boolean results on unknown ids) ------------------

    /// Enable a task; its next fire is computed from "now". False when the
    /// id is unknown.
    pub async fn start_task(&self, id: &str) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.registry.set_enabled(id, true).await
    }

    /// Disable a task. A queued or running cycle finishes (and is
    /// recorded), but no further fires are scheduled. False when unknown.
    pub async fn stop_task(&self, id: &str) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.registry.set_enabled(id, false).await
    }

    /// Trigger an out-of-band run. Counts toward metrics exactly like a
    /// scheduled fire and leaves `next_fire_at` untouched; works on
    /// disabled tasks. False when the id is unknown or the engine is not
    /// running.
    pub async fn execute_now(&self, id: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(priority) = self.registry.priority_of(id).await else {
            return false;
        };
        tracing::info!("⚡ Execute-now: '{id}'");
        if self.queue.submit(id, priority).await {
            self.registry.mark_queued(id).await;
        }
        true
    }

    // ---- read surface ----------------------------------------------------

    pub async fn list_tasks(&self, filter: TaskFilter) -> Vec<TaskRuntimeState> {
        self.registry.list(filter).await
    }

    pub async fn task_info(&self, id: &str) -> Option<TaskRuntimeState> {
        self.registry.get(id).await
    }

    pub async fn task_definition(&self, id: &str) -> Option<TaskDefinition> {
        self.registry.definition(id).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let snapshot = self.metrics.snapshot().await;
        SchedulerStats {
            total_tasks: self.registry.len().await,
            enabled_tasks: self.registry.count_enabled().await,
            running: self.registry.count_state(crate::task::TaskState::Running).await
                + self.registry.count_state(crate::task::TaskState::Retrying).await,
            queued: self.queue.queued_len().await,
            max_concurrent_tasks: self.config.read().await.max_concurrent_tasks,
            tasks_executed: snapshot.tasks_executed,
            tasks_completed: snapshot.tasks_completed,
            tasks_failed: snapshot.tasks_failed,
            uptime_secs: snapshot.uptime_secs,
            last_error: snapshot.last_error,
        }
    }

    /// Newest-first execution log for the dashboard stream.
    pub async fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.metrics.recent(limit).await
    }

    // ---- bulk operations -------------------------------------------------

    /// Disable every enabled task, remembering the set for `resume_all`.
    /// Returns how many tasks were paused.
    pub async fn pause_all(&self) -> usize {
        let mut paused = self.paused.lock().await;
        let ids = self.registry.enabled_ids().await;
        for id in &ids {
            self.registry.set_enabled(id, false).await;
        }
        let count = ids.len();
        tracing::info!("⏸️ Paused {count} task(s)");
        // A repeated pause merges into the snapshot instead of clobbering
        // it, so resume_all still restores the original enabled set.
        match paused.as_mut() {
            Some(existing) => existing.extend(ids),
            None => *paused = Some(ids.into_iter().collect()),
        }
        count
    }

    /// Re-enable exactly the tasks `pause_all` disabled. Tasks that were
    /// already stopped before the pause stay stopped.
    pub async fn resume_all(&self) -> usize {
        let Some(ids) = self.paused.lock().await.take() else {
            return 0;
        };
        let mut resumed = 0;
        for id in &ids {
            if self.registry.set_enabled(id, true).await {
                resumed += 1;
            }
        }
        tracing::info!("▶️ Resumed {resumed} task(s)");
        resumed
    }

    /// Reload definitions from the task source (when injected) and reset
    /// all runtime state. Cumulative metrics survive.
    pub async fn restart(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(FlywheelError::SchedulerStopped);
        }
        tracing::info!("🔄 Scheduler restart: reloading task definitions");
        self.queue.clear_queued().await;
        match &self.source {
            Some(source) => {
                let defs = source.load().await?;
                self.registry.replace_all(defs).await?;
            }
            None => self.registry.reset_runtime().await,
        }
        *self.paused.lock().await = None;
        Ok(())
    }

    /// Drop stale queued entries for tasks no longer registered. Returns
    /// how many entries were removed.
    pub async fn cleanup(&self) -> usize {
        let registered = self.registry.ids().await;
        let removed = self.queue.cleanup(&registered).await;
        if removed > 0 {
            tracing::info!("🧹 Cleanup removed {removed} stale dispatch request(s)");
        }
        removed
    }

    // ---- configuration ---------------------------------------------------

    pub async fn config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Apply a config update live. Concurrency and the default
    /// timeout/retry values take effect for cycles started afterwards; the
    /// tick resolution applies on the next engine start.
    pub async fn update_config(&self, new: SchedulerConfig) -> Result<()> {
        new.validate()?;
        self.pool.apply_config(&new).await;
        *self.config.write().await = new;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FnBody, Outcome, Priority, Schedule, TaskState};
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    fn fast_config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_tasks: max_concurrent,
            default_timeout_secs: 5,
            default_retry_attempts: 0,
            retry_backoff_ms: 10,
            tick_interval_ms: 20,
            execution_log_capacity: 100,
        }
    }

    fn noop() -> Arc<dyn TaskBody> {
        Arc::new(FnBody::new(|| async { Ok(()) }))
    }

    fn counting(counter: Arc<AtomicU32>) -> Arc<dyn TaskBody> {
        Arc::new(FnBody::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    fn interval_def(id: &str, every_ms: u64) -> TaskDefinition {
        TaskDefinition::new(id, Schedule::interval(Duration::from_millis(every_ms)))
    }

    #[tokio::test]
    async fn test_scheduled_execution_end_to_end() {
        let sched = Scheduler::new(fast_config(4)).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        sched
            .schedule_task(interval_def("ticker", 50), counting(count.clone()))
            .await
            .unwrap();
        sched.start().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        sched.shutdown().await;
        // Let an in-flight cycle settle before reading counters
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least 2 fires, got {fired}");
        let info = sched.task_info("ticker").await.unwrap();
        assert_eq!(info.executions as u32, fired);
        assert_eq!(info.failures, 0);
        assert_eq!(info.success_rate(), Some(100.0));
    }

    #[tokio::test]
    async fn test_generated_id() {
        let sched = Scheduler::new(fast_config(1)).unwrap();
        let def = TaskDefinition::new("", Schedule::interval(Duration::from_secs(60)));
        let id = sched.schedule_task(def, noop()).await.unwrap();
        assert!(id.starts_with("task-"));
        assert!(sched.task_info(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let active = active.clone();
            let peak = peak.clone();
            let body = Arc::new(FnBody::new(move || {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
            // Long interval: these only run via execute_now
            sched
                .schedule_task(interval_def(&format!("t{i}"), 60_000), body)
                .await
                .unwrap();
        }
        sched.start().await;
        for i in 0..5 {
            assert!(sched.execute_now(&format!("t{i}")).await);
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        sched.shutdown().await;

        assert!(peak.load(Ordering::SeqCst) <= 2, "concurrency bound exceeded");
        let stats = sched.stats().await;
        assert_eq!(stats.tasks_executed, 5);
        assert_eq!(stats.tasks_completed, 5);
    }

    #[tokio::test]
    async fn test_slow_task_fires_are_coalesced() {
        // Fires every 50ms but takes 150ms to run with one slot: after
        // ~400ms only 1-2 cycles may have completed, not 8.
        let sched = Scheduler::new(fast_config(1)).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let body = Arc::new(FnBody::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(())
            }
        }));
        let def = interval_def("slow", 50).with_priority(Priority::Critical);
        sched.schedule_task(def, body).await.unwrap();
        sched.start().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        sched.shutdown().await;

        let fired = count.load(Ordering::SeqCst);
        assert!((1..=3).contains(&fired), "expected coalesced fires, got {fired}");
    }

    #[tokio::test]
    async fn test_stop_suppresses_fires_until_start() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        sched
            .schedule_task(interval_def("t", 40), counting(count.clone()))
            .await
            .unwrap();
        sched.start().await;

        assert!(sched.stop_task("t").await);
        let before = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), before, "fired while stopped");
        assert_eq!(sched.task_info("t").await.unwrap().state, TaskState::Stopped);

        assert!(sched.start_task("t").await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(count.load(Ordering::SeqCst) > before, "did not resume");
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_control_calls_return_false_on_unknown_id() {
        let sched = Scheduler::new(fast_config(1)).unwrap();
        sched.start().await;
        assert!(!sched.start_task("ghost").await);
        assert!(!sched.stop_task("ghost").await);
        assert!(!sched.execute_now("ghost").await);
        assert!(sched.task_info("ghost").await.is_none());
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_now_on_disabled_task() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let def = interval_def("manual", 60_000).with_enabled(false);
        sched.schedule_task(def, counting(count.clone())).await.unwrap();
        sched.start().await;

        let before = sched.task_info("manual").await.unwrap();
        assert!(before.next_fire_at.is_none());

        assert!(sched.execute_now("manual").await);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let after = sched.task_info("manual").await.unwrap();
        assert_eq!(after.executions, 1);
        // Out-of-band runs never touch the schedule
        assert!(after.next_fire_at.is_none());
        assert_eq!(after.state, TaskState::Stopped);
        assert_eq!(sched.stats().await.tasks_executed, 1);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_now_after_shutdown_fails() {
        let sched = Scheduler::new(fast_config(1)).unwrap();
        sched.schedule_task(interval_def("t", 60_000), noop()).await.unwrap();
        sched.start().await;
        sched.shutdown().await;

        assert!(!sched.execute_now("t").await);
        let err = sched.schedule_task(interval_def("late", 60_000), noop()).await;
        assert!(matches!(err, Err(FlywheelError::SchedulerStopped)));
        assert!(matches!(sched.restart().await, Err(FlywheelError::SchedulerStopped)));
    }

    #[tokio::test]
    async fn test_retry_cycle_counts_once() {
        let sched = Scheduler::new(fast_config(1)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let body = Arc::new(FnBody::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("always throws".to_string())
            }
        }));
        let def = interval_def("b", 60_000).with_retry_limit(2);
        sched.schedule_task(def, body).await.unwrap();
        sched.start().await;

        assert!(sched.execute_now("b").await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        sched.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let info = sched.task_info("b").await.unwrap();
        assert_eq!(info.executions, 1);
        assert_eq!(info.failures, 1);
        assert_eq!(info.last_error.unwrap().message, "always throws");
        let stats = sched.stats().await;
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.last_error.unwrap().task_id, "b");
        // Failed cycle does not disable the task
        let info = sched.task_info("b").await.unwrap();
        assert_eq!(info.state, TaskState::Scheduled);
    }

    #[tokio::test]
    async fn test_pause_all_resume_all_roundtrip() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        sched
            .schedule_task(interval_def("on", 40), counting(count.clone()))
            .await
            .unwrap();
        sched
            .schedule_task(interval_def("off", 40).with_enabled(false), noop())
            .await
            .unwrap();
        sched.start().await;

        assert_eq!(sched.pause_all().await, 1);
        let before = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        // No fires during the paused window
        assert_eq!(count.load(Ordering::SeqCst), before);

        assert_eq!(sched.resume_all().await, 1);
        // Pre-pause enabled flags are restored exactly
        assert_eq!(sched.task_info("off").await.unwrap().state, TaskState::Stopped);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(count.load(Ordering::SeqCst) > before);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_pause_keeps_resume_snapshot() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        sched.schedule_task(interval_def("a", 60_000), noop()).await.unwrap();
        sched.schedule_task(interval_def("b", 60_000), noop()).await.unwrap();

        assert_eq!(sched.pause_all().await, 2);
        // A retried pause sees nothing enabled and must not clobber the
        // snapshot of what to resume
        assert_eq!(sched.pause_all().await, 0);

        assert_eq!(sched.resume_all().await, 2);
        assert_eq!(sched.task_info("a").await.unwrap().state, TaskState::Scheduled);
        assert_eq!(sched.task_info("b").await.unwrap().state, TaskState::Scheduled);
    }

    #[tokio::test]
    async fn test_stop_while_running_records_result() {
        let sched = Scheduler::new(fast_config(1)).unwrap();
        let done = Arc::new(AtomicU32::new(0));
        let flag = done.clone();
        // Ignores the cancellation token and finishes on its own
        let body = Arc::new(FnBody::new(move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        sched.schedule_task(interval_def("t", 60_000), body).await.unwrap();
        sched.start().await;

        assert!(sched.execute_now("t").await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sched.stop_task("t").await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        sched.shutdown().await;

        // The in-flight attempt completed normally and was recorded
        assert_eq!(done.load(Ordering::SeqCst), 1);
        let info = sched.task_info("t").await.unwrap();
        assert_eq!(info.executions, 1);
        assert_eq!(info.failures, 0);
        assert_eq!(info.state, TaskState::Stopped);
        assert_eq!(sched.recent_executions(5).await[0].outcome, Outcome::Success);
        assert_eq!(sched.stats().await.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_restart_resets_runtime_keeps_metrics() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        sched.schedule_task(interval_def("t", 60_000), noop()).await.unwrap();
        sched.start().await;
        assert!(sched.execute_now("t").await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sched.stats().await.tasks_executed, 1);

        sched.restart().await.unwrap();

        let info = sched.task_info("t").await.unwrap();
        assert_eq!(info.executions, 0);
        assert_eq!(info.state, TaskState::Scheduled);
        // Cumulative metrics survive the restart
        assert_eq!(sched.stats().await.tasks_executed, 1);
        sched.shutdown().await;
    }

    struct FixedSource(Vec<TaskDefinition>);

    #[async_trait::async_trait]
    impl TaskSource for FixedSource {
        async fn load(&self) -> Result<Vec<(TaskDefinition, Arc<dyn TaskBody>)>> {
            Ok(self
                .0
                .iter()
                .map(|def| (def.clone(), noop()))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_restart_reloads_from_source() {
        let source = Arc::new(FixedSource(vec![
            interval_def("fresh-a", 60_000),
            interval_def("fresh-b", 60_000),
        ]));
        let sched = Scheduler::with_source(fast_config(2), source).unwrap();
        sched.schedule_task(interval_def("old", 60_000), noop()).await.unwrap();
        sched.start().await;

        sched.restart().await.unwrap();

        assert!(sched.task_info("old").await.is_none());
        assert!(sched.task_info("fresh-a").await.is_some());
        assert!(sched.task_info("fresh-b").await.is_some());
        assert_eq!(sched.stats().await.total_tasks, 2);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_order_within_tick() {
        // One slot, three due tasks: the critical one must run first.
        let sched = Scheduler::new(fast_config(1)).unwrap();
        let order: Arc<tokio::sync::Mutex<Vec<&'static str>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::new()));
        for (id, priority) in [
            ("low", Priority::Low),
            ("crit", Priority::Critical),
            ("norm", Priority::Normal),
        ] {
            let order = order.clone();
            let body = Arc::new(FnBody::new(move || {
                let order = order.clone();
                async move {
                    order.lock().await.push(id);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            }));
            sched
                .schedule_task(interval_def(id, 40).with_priority(priority), body)
                .await
                .unwrap();
        }
        sched.start().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        sched.shutdown().await;

        let order = order.lock().await;
        assert!(!order.is_empty());
        assert_eq!(order[0], "crit");
    }

    #[tokio::test]
    async fn test_cleanup_and_recent_executions() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        sched.schedule_task(interval_def("t", 60_000), noop()).await.unwrap();
        sched.start().await;
        assert!(sched.execute_now("t").await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = sched.recent_executions(10).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].task_id, "t");
        assert_eq!(log[0].outcome, Outcome::Success);

        assert_eq!(sched.cleanup().await, 0);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let sched = Scheduler::new(fast_config(2)).unwrap();
        let mut bad = fast_config(2);
        bad.max_concurrent_tasks = 0;
        assert!(sched.update_config(bad).await.is_err());

        let mut bigger = fast_config(2);
        bigger.max_concurrent_tasks = 8;
        sched.update_config(bigger).await.unwrap();
        assert_eq!(sched.stats().await.max_concurrent_tasks, 8);
    }
}
