//! In-memory task status tracking.
//!
//! The tracker is the single writer of truth for ingestion progress: every
//! pipeline transition flows through [`TaskStatusTracker::update`], and
//! polling readers always see a complete snapshot (clone-out under a read
//! lock, never a torn record).
//!
//! Updates for one `task_id` are serialized by the map's write lock, and
//! progress regression on a non-terminal task is rejected, so a delayed
//! out-of-order update can never roll a task backwards. Terminal tasks stay
//! until an explicit [`TaskStatusTracker::cleanup`] pass.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::models::{ProcessingTask, TaskState};

#[derive(Clone, Default)]
pub struct TaskStatusTracker {
    inner: Arc<RwLock<HashMap<String, ProcessingTask>>>,
}

impl TaskStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in its initial state.
    pub fn create(&self, task_id: &str) -> ProcessingTask {
        let now = Utc::now();
        let task = ProcessingTask {
            task_id: task_id.to_string(),
            state: TaskState::Loading,
            progress: 0.0,
            current_operation: "queued".to_string(),
            metadata: serde_json::json!({}),
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        let mut map = self.inner.write().expect("task map poisoned");
        map.insert(task_id.to_string(), task.clone());
        task
    }

    /// Atomic per-key status update. Progress below the task's current value
    /// is clamped; updates to an already-terminal task are ignored.
    pub fn update(
        &self,
        task_id: &str,
        state: TaskState,
        progress: f64,
        operation: &str,
        metadata: serde_json::Value,
    ) {
        let mut map = self.inner.write().expect("task map poisoned");
        let Some(task) = map.get_mut(task_id) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }

        task.state = state;
        task.progress = progress.clamp(task.progress, 1.0);
        task.current_operation = operation.to_string();
        if !metadata.is_null() {
            task.metadata = metadata;
        }
        task.updated_at = Utc::now();
    }

    /// Transition a task to `FAILED` with a user-facing error payload.
    pub fn fail(&self, task_id: &str, error: &str) {
        let mut map = self.inner.write().expect("task map poisoned");
        if let Some(task) = map.get_mut(task_id) {
            if task.state.is_terminal() {
                return;
            }
            task.state = TaskState::Failed;
            task.progress = 1.0;
            task.current_operation = "failed".to_string();
            task.error = Some(error.to_string());
            task.updated_at = Utc::now();
        }
    }

    /// Mark a task cancelled (observed by the pipeline at a stage boundary).
    pub fn mark_cancelled(&self, task_id: &str) {
        let mut map = self.inner.write().expect("task map poisoned");
        if let Some(task) = map.get_mut(task_id) {
            if task.state.is_terminal() {
                return;
            }
            task.state = TaskState::Cancelled;
            task.progress = 1.0;
            task.current_operation = "cancelled".to_string();
            task.updated_at = Utc::now();
        }
    }

    /// Request cancellation; the flag is checked at stage boundaries.
    /// Returns false for unknown or already-terminal tasks.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        let mut map = self.inner.write().expect("task map poisoned");
        match map.get_mut(task_id) {
            Some(task) if !task.state.is_terminal() => {
                task.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_requested(&self, task_id: &str) -> bool {
        let map = self.inner.read().expect("task map poisoned");
        map.get(task_id).map(|t| t.cancel_requested).unwrap_or(false)
    }

    /// Snapshot read; never observes a partial write.
    pub fn get(&self, task_id: &str) -> Option<ProcessingTask> {
        let map = self.inner.read().expect("task map poisoned");
        map.get(task_id).cloned()
    }

    /// Remove terminal tasks whose last update is older than `older_than`.
    /// Returns the number of tasks removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut map = self.inner.write().expect("task map poisoned");
        let before = map.len();
        map.retain(|_, task| !(task.state.is_terminal() && task.updated_at < cutoff));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("task map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_regresses() {
        let tracker = TaskStatusTracker::new();
        tracker.create("t1");
        tracker.update("t1", TaskState::Chunking, 0.6, "chunking", serde_json::json!({}));
        // A delayed earlier update arrives out of order.
        tracker.update("t1", TaskState::Extracting, 0.4, "extracting", serde_json::json!({}));

        let task = tracker.get("t1").unwrap();
        assert!(task.progress >= 0.6);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let tracker = TaskStatusTracker::new();
        tracker.create("t1");
        tracker.fail("t1", "unsupported format");
        tracker.update("t1", TaskState::Storing, 0.8, "storing", serde_json::json!({}));

        let task = tracker.get("t1").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("unsupported format"));
    }

    #[test]
    fn test_cancel_flag_roundtrip() {
        let tracker = TaskStatusTracker::new();
        tracker.create("t1");
        assert!(!tracker.cancel_requested("t1"));
        assert!(tracker.request_cancel("t1"));
        assert!(tracker.cancel_requested("t1"));

        tracker.mark_cancelled("t1");
        assert_eq!(tracker.get("t1").unwrap().state, TaskState::Cancelled);
        // Cancelling a terminal task is a no-op.
        assert!(!tracker.request_cancel("t1"));
    }

    #[test]
    fn test_unknown_task_reads() {
        let tracker = TaskStatusTracker::new();
        assert!(tracker.get("missing").is_none());
        assert!(!tracker.request_cancel("missing"));
        assert!(!tracker.cancel_requested("missing"));
    }

    #[test]
    fn test_cleanup_removes_only_old_terminal_tasks() {
        let tracker = TaskStatusTracker::new();
        tracker.create("done");
        tracker.update("done", TaskState::Completed, 1.0, "done", serde_json::json!({}));
        tracker.create("running");
        tracker.update("running", TaskState::Chunking, 0.6, "chunking", serde_json::json!({}));

        // Retention of zero: terminal tasks are immediately eligible.
        let removed = tracker.cleanup(Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(tracker.get("done").is_none());
        assert!(tracker.get("running").is_some());

        // A long retention keeps everything.
        tracker.create("done2");
        tracker.update("done2", TaskState::Completed, 1.0, "done", serde_json::json!({}));
        assert_eq!(tracker.cleanup(Duration::from_secs(3600)), 0);
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        let tracker = TaskStatusTracker::new();
        tracker.create("t1");

        let writer = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for i in 1..=100 {
                    tracker.update(
                        "t1",
                        TaskState::Chunking,
                        i as f64 / 100.0,
                        "chunking",
                        serde_json::json!({ "step": i }),
                    );
                }
            })
        };

        let mut last = 0.0;
        for _ in 0..200 {
            let task = tracker.get("t1").unwrap();
            assert!(task.progress >= last, "progress regressed");
            last = task.progress;
        }
        writer.join().unwrap();
        assert!((tracker.get("t1").unwrap().progress - 1.0).abs() < 1e-9);
    }
}
