//! Background task table for fire-and-poll tool executions.
//!
//! Every spawn allocates a `TaskRecord` that exactly one worker drives
//! through the monotonic state machine Pending -> Running -> terminal.
//! Pollers only read; they never advance a task. The terminal write is
//! exactly-once: a result arriving after the task already went terminal
//! (typically after a deadline fired) is discarded, never overwritten.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rmcp::model::Content;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::RouterError;

/// State of one background execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

/// Terminal outcome reported by the worker bound to a task.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(Vec<Content>),
    Failed(RouterError),
    TimedOut { secs: f64 },
}

#[derive(Debug)]
struct TaskRecord {
    tool_id: String,
    state: TaskState,
    result: Option<Vec<Content>>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Read-only view of a task returned to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub tool_id: String,
    pub state: TaskState,
    pub result: Option<Vec<Content>>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Shared table of in-flight and completed background tasks.
///
/// Many-reader/single-writer per entry: the spawned worker is the only
/// writer for its task, pollers take the read lock and clone a snapshot.
pub struct TaskTable {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a new Pending task and return its id. Never blocks on any
    /// in-flight execution.
    pub async fn create(&self, tool_id: &str, deadline: std::time::Duration) -> Uuid {
        let task_id = Uuid::new_v4();
        let now = Utc::now();
        let record = TaskRecord {
            tool_id: tool_id.to_string(),
            state: TaskState::Pending,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            deadline: now
                + chrono::Duration::from_std(deadline)
                    .unwrap_or_else(|_| chrono::Duration::days(365)),
            finished_at: None,
        };
        self.tasks.write().await.insert(task_id, record);
        task_id
    }

    /// Move a Pending task to Running. A no-op once the task has gone
    /// terminal (the deadline may fire before the worker even starts).
    pub async fn mark_running(&self, task_id: Uuid) {
        let mut tasks = self.tasks.write().await;
        if let Some(record) = tasks.get_mut(&task_id) {
            if record.state == TaskState::Pending {
                record.state = TaskState::Running;
            }
        }
    }

    /// Commit a terminal outcome. Returns false when the task was already
    /// terminal, in which case the outcome is discarded.
    pub async fn finish(&self, task_id: Uuid, outcome: TaskOutcome) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(record) = tasks.get_mut(&task_id) else {
            debug!("Dropping outcome for unknown task {}", task_id);
            return false;
        };

        if record.state.is_terminal() {
            debug!(
                "Discarding late outcome for task {} already in state {}",
                task_id,
                record.state.as_str()
            );
            return false;
        }

        match outcome {
            TaskOutcome::Completed(content) => {
                record.state = TaskState::Completed;
                record.result = Some(content);
            }
            TaskOutcome::Failed(err) => {
                record.state = TaskState::Failed;
                record.error_kind = Some(err.kind());
                record.error = Some(err.to_string());
            }
            TaskOutcome::TimedOut { secs } => {
                record.state = TaskState::TimedOut;
                record.error_kind = Some("timeout_error");
                record.error = Some(format!("tool execution exceeded timeout of {}s", secs));
            }
        }
        record.finished_at = Some(Utc::now());
        true
    }

    /// Current state of a task; includes the result or error once terminal.
    /// A pure read: repeated polls of a terminal task return the same
    /// snapshot.
    pub async fn poll(&self, task_id: Uuid) -> Result<TaskSnapshot, RouterError> {
        let tasks = self.tasks.read().await;
        let record = tasks
            .get(&task_id)
            .ok_or_else(|| RouterError::UnknownTask(task_id.to_string()))?;

        Ok(TaskSnapshot {
            task_id,
            tool_id: record.tool_id.clone(),
            state: record.state,
            result: record.result.clone(),
            error: record.error.clone(),
            error_kind: record.error_kind.map(|k| k.to_string()),
            created_at: record.created_at,
            deadline: record.deadline,
        })
    }

    /// Eviction hook: drop terminal tasks that finished before `cutoff`.
    /// In-flight tasks are never evicted.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| match record.finished_at {
            Some(finished) => !record.state.is_terminal() || finished >= cutoff,
            None => true,
        });
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_task_is_pending() {
        let table = TaskTable::new();
        let id = table.create("alpha:add", Duration::from_secs(5)).await;
        let snapshot = table.poll(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Pending);
        assert!(snapshot.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_id() {
        let table = TaskTable::new();
        let err = table.poll(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_task");
    }

    #[tokio::test]
    async fn test_completed_flow_and_idempotent_poll() {
        let table = TaskTable::new();
        let id = table.create("alpha:add", Duration::from_secs(5)).await;

        table.mark_running(id).await;
        assert_eq!(table.poll(id).await.unwrap().state, TaskState::Running);

        let content = vec![Content::text("3")];
        assert!(table.finish(id, TaskOutcome::Completed(content)).await);

        let first = table.poll(id).await.unwrap();
        assert_eq!(first.state, TaskState::Completed);
        assert!(first.result.is_some());

        let second = table.poll(id).await.unwrap();
        assert_eq!(second.state, TaskState::Completed);
        assert_eq!(
            serde_json::to_value(&first.result).unwrap(),
            serde_json::to_value(&second.result).unwrap()
        );
    }

    #[tokio::test]
    async fn test_late_result_never_overwrites_timeout() {
        let table = TaskTable::new();
        let id = table.create("alpha:slow", Duration::from_secs(1)).await;
        table.mark_running(id).await;

        assert!(table.finish(id, TaskOutcome::TimedOut { secs: 1.0 }).await);

        // The upstream call eventually returns; its result must be discarded.
        let late = vec![Content::text("too late")];
        assert!(!table.finish(id, TaskOutcome::Completed(late)).await);

        let snapshot = table.poll(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::TimedOut);
        assert!(snapshot.result.is_none());
        assert_eq!(snapshot.error_kind.as_deref(), Some("timeout_error"));

        // Polling again still reports TimedOut.
        assert_eq!(table.poll(id).await.unwrap().state, TaskState::TimedOut);
    }

    #[tokio::test]
    async fn test_mark_running_after_terminal_is_ignored() {
        let table = TaskTable::new();
        let id = table.create("alpha:add", Duration::from_secs(1)).await;
        table.finish(id, TaskOutcome::TimedOut { secs: 1.0 }).await;

        table.mark_running(id).await;
        assert_eq!(table.poll(id).await.unwrap().state, TaskState::TimedOut);
    }

    #[tokio::test]
    async fn test_failed_outcome_carries_error_kind() {
        let table = TaskTable::new();
        let id = table.create("alpha:add", Duration::from_secs(1)).await;
        table
            .finish(
                id,
                TaskOutcome::Failed(RouterError::Upstream {
                    server: "alpha".to_string(),
                    message: "division by zero".to_string(),
                }),
            )
            .await;

        let snapshot = table.poll(id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.error_kind.as_deref(), Some("upstream_error"));
        assert!(snapshot.error.unwrap().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let table = TaskTable::new();
        let a = table.create("alpha:add", Duration::from_secs(1)).await;
        let b = table.create("alpha:add", Duration::from_secs(1)).await;
        assert_ne!(a, b);
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_eviction_only_touches_finished_tasks() {
        let table = TaskTable::new();
        let done = table.create("alpha:add", Duration::from_secs(1)).await;
        let live = table.create("alpha:add", Duration::from_secs(1)).await;
        table
            .finish(done, TaskOutcome::Completed(vec![Content::text("3")]))
            .await;

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let evicted = table.evict_finished_before(cutoff).await;
        assert_eq!(evicted, 1);
        assert!(table.poll(done).await.is_err());
        assert_eq!(table.poll(live).await.unwrap().state, TaskState::Pending);
    }
}
