//! Dispatch Queue — priority-banded, coalescing request queue.
//!
//! Four bands (critical > high > normal > low), FIFO within a band. A
//! request for a task that is already queued or running is coalesced: the
//! in-flight set guarantees at most one pending entry per task, so a slow
//! task firing faster than it finishes cannot grow the queue without bound.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::task::Priority;

const BANDS: usize = 4;

/// One pending execution request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub task_id: String,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

struct QueueState {
    bands: [VecDeque<DispatchRequest>; BANDS],
    /// Ids that are queued or currently executing.
    in_flight: HashSet<String>,
}

/// Orders pending requests and hands them to the worker pool.
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                bands: std::array::from_fn(|_| VecDeque::new()),
                in_flight: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Submit a request. Returns false when coalesced with an in-flight
    /// request for the same task.
    pub async fn submit(&self, task_id: &str, priority: Priority) -> bool {
        let mut state = self.state.lock().await;
        if !state.in_flight.insert(task_id.to_string()) {
            tracing::debug!("↩️ Coalesced dispatch for '{task_id}' (already in flight)");
            return false;
        }
        state.bands[priority.rank()].push_back(DispatchRequest {
            task_id: task_id.to_string(),
            priority,
            submitted_at: Utc::now(),
        });
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Pop the highest-priority, oldest-submitted request. The task stays
    /// in flight until [`DispatchQueue::complete`].
    pub async fn pop(&self) -> Option<DispatchRequest> {
        let mut state = self.state.lock().await;
        for band in state.bands.iter_mut() {
            if let Some(req) = band.pop_front() {
                return Some(req);
            }
        }
        None
    }

    /// Mark a task's cycle finished, freeing its in-flight slot.
    pub async fn complete(&self, task_id: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(task_id);
        drop(state);
        // A slot just freed; wake the dispatch loop for any waiting request.
        self.notify.notify_one();
    }

    /// Wait until something is submitted or a slot frees.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Drop queued entries for tasks not in `registered`. Returns how many
    /// were removed.
    pub async fn cleanup(&self, registered: &HashSet<String>) -> usize {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for band in state.bands.iter_mut() {
            let before = band.len();
            band.retain(|req| registered.contains(&req.task_id));
            removed += before - band.len();
        }
        let queued: HashSet<String> = state
            .bands
            .iter()
            .flat_map(|b| b.iter().map(|r| r.task_id.clone()))
            .collect();
        // In-flight ids that are neither queued nor registered are stale.
        state
            .in_flight
            .retain(|id| queued.contains(id) || registered.contains(id));
        removed
    }

    /// Drop every queued entry (in-flight cycles keep their slots).
    pub async fn clear_queued(&self) {
        let mut state = self.state.lock().await;
        let queued: Vec<String> = state
            .bands
            .iter()
            .flat_map(|b| b.iter().map(|r| r.task_id.clone()))
            .collect();
        for band in state.bands.iter_mut() {
            band.clear();
        }
        for id in queued {
            state.in_flight.remove(&id);
        }
    }

    pub async fn queued_len(&self) -> usize {
        let state = self.state.lock().await;
        state.bands.iter().map(|b| b.len()).sum()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
