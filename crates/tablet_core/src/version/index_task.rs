//! Long-running background index tasks recorded in a version.
//!
//! Tasks are keyed by `(task_type, task_name)` and move through:
//!
//! ```text
//! READY <-> SUSPENDED
//!   \         /
//!    +-> ABORTED
//!    +-> DONE
//! ```
//!
//! Finished tasks (aborted or done) are retained up to
//! [`MAX_FINISHED_INDEX_TASKS`]; the oldest finished ones are dropped first.

use crate::types::VersionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Maximum number of finished tasks retained in the history.
pub const MAX_FINISHED_INDEX_TASKS: usize = 32;

/// Task type whose completion promotes the read schema.
pub const ALTER_TABLE_TASK_TYPE: &str = "alter_table";

/// Parameter of an alter-table task naming its target schema.
pub const SCHEMA_ID_PARAM: &str = "schema_id";

/// State of an index task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexTaskState {
    /// Runnable.
    Ready,
    /// Paused; can be resumed with another `Add`.
    Suspended,
    /// Cancelled; terminal.
    Aborted,
    /// Completed; terminal.
    Done,
}

impl IndexTaskState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Aborted | Self::Done)
    }
}

/// Requested change to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexTaskAction {
    /// Start a task (or resume a suspended one).
    Add,
    /// Replace the parameters of an unfinished task.
    Overwrite,
    /// Pause a ready task.
    Suspend,
    /// Cancel an unfinished task.
    Abort,
    /// Mark a task completed.
    Done,
}

/// One task entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTaskMeta {
    /// Task type (for example `alter_table`, `reclaim`).
    pub task_type: String,
    /// Task name, unique per type.
    pub task_name: String,
    /// Free-form parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Current state.
    pub state: IndexTaskState,
    /// Time of the last transition in microseconds.
    pub update_time_us: i64,
    /// Latest operator comment.
    #[serde(default)]
    pub comment: String,
    /// Version in which the task finished, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_in: Option<VersionId>,
}

/// Request to change a task, as queued by the committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTaskRequest {
    /// Task type.
    pub task_type: String,
    /// Task name.
    pub task_name: String,
    /// Parameters (used by `Add` and `Overwrite`).
    pub params: BTreeMap<String, String>,
    /// Requested change.
    pub action: IndexTaskAction,
    /// Operator comment.
    pub comment: String,
}

/// Ordered history of index tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexTaskHistory {
    tasks: Vec<IndexTaskMeta>,
}

impl IndexTaskHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all tasks, oldest first.
    #[must_use]
    pub fn tasks(&self) -> &[IndexTaskMeta] {
        &self.tasks
    }

    /// Finds a task by key.
    #[must_use]
    pub fn find(&self, task_type: &str, task_name: &str) -> Option<&IndexTaskMeta> {
        self.tasks
            .iter()
            .rev()
            .find(|t| t.task_type == task_type && t.task_name == task_name)
    }

    /// Returns unfinished tasks.
    pub fn active(&self) -> impl Iterator<Item = &IndexTaskMeta> {
        self.tasks.iter().filter(|t| !t.state.is_finished())
    }

    fn position(&self, task_type: &str, task_name: &str) -> Option<usize> {
        self.tasks
            .iter()
            .rposition(|t| t.task_type == task_type && t.task_name == task_name)
    }

    /// Applies a request. Returns the resulting task state, or `None` if the
    /// request was not applicable and was skipped.
    pub fn apply(&mut self, request: &IndexTaskRequest, now_us: i64) -> Option<IndexTaskState> {
        let position = self.position(&request.task_type, &request.task_name);
        let current = position.map(|p| self.tasks[p].state);

        let next = match (request.action, current) {
            (IndexTaskAction::Add, None) => IndexTaskState::Ready,
            (IndexTaskAction::Add, Some(state)) if state.is_finished() => IndexTaskState::Ready,
            (IndexTaskAction::Add, Some(IndexTaskState::Suspended | IndexTaskState::Ready)) => {
                IndexTaskState::Ready
            }
            (IndexTaskAction::Overwrite, Some(state)) if !state.is_finished() => state,
            (IndexTaskAction::Suspend, Some(IndexTaskState::Ready)) => IndexTaskState::Suspended,
            (IndexTaskAction::Abort, Some(state)) if !state.is_finished() => IndexTaskState::Aborted,
            (IndexTaskAction::Done, Some(state)) if !state.is_finished() => IndexTaskState::Done,
            (action, state) => {
                warn!(
                    task_type = %request.task_type,
                    task_name = %request.task_name,
                    ?action,
                    ?state,
                    "index task transition not applicable, skipped"
                );
                return None;
            }
        };

        let replace_params = matches!(
            request.action,
            IndexTaskAction::Add | IndexTaskAction::Overwrite
        );
        match position {
            Some(p) if !(current.is_some_and(IndexTaskState::is_finished)
                && request.action == IndexTaskAction::Add) =>
            {
                let task = &mut self.tasks[p];
                task.state = next;
                task.update_time_us = now_us;
                task.comment = request.comment.clone();
                if replace_params {
                    task.params = request.params.clone();
                }
            }
            _ => self.tasks.push(IndexTaskMeta {
                task_type: request.task_type.clone(),
                task_name: request.task_name.clone(),
                params: request.params.clone(),
                state: next,
                update_time_us: now_us,
                comment: request.comment.clone(),
                finished_in: None,
            }),
        }

        self.trim_finished();
        Some(next)
    }

    /// Stamps tasks that finished without a version id yet.
    pub fn stamp_finished(&mut self, version_id: VersionId) {
        for task in &mut self.tasks {
            if task.state.is_finished() && task.finished_in.is_none() {
                task.finished_in = Some(version_id);
            }
        }
    }

    fn trim_finished(&mut self) {
        let finished = self.tasks.iter().filter(|t| t.state.is_finished()).count();
        let mut excess = finished.saturating_sub(MAX_FINISHED_INDEX_TASKS);
        self.tasks.retain(|t| {
            if excess > 0 && t.state.is_finished() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}
