//! The shared task board.
//!
//! Tasks form a DAG through `depends_on`. All mutation goes through
//! `add_task`/`claim`/`complete`, serialised under the board's own lock,
//! which is what makes claims atomic: concurrent claims for one id
//! succeed for at most one caller.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A unit of team work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// What needs to be done.
    pub description: String,
    /// Ids that must be completed before this task is claimable.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    /// Create a task without dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            depends_on: Vec::new(),
        }
    }

    /// Add dependencies.
    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Unclaimed.
    Pending,
    /// Claimed by a member.
    Claimed,
    /// Finished with a result.
    Completed,
}

/// Runtime state of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// The task definition.
    pub task: Task,
    /// Current status.
    pub status: TaskStatus,
    /// The member holding the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    /// Result recorded on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Claim time, unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at_ms: Option<u64>,
    /// Completion time, unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The team's shared DAG of tasks with atomic-claim semantics.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Mutex<Vec<TaskState>>,
}

impl TaskBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on a duplicate id.
    pub fn add_task(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("board lock poisoned");
        if tasks.iter().any(|state| state.task.id == task.id) {
            return Err(Error::configuration(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
        tasks.push(TaskState {
            task,
            status: TaskStatus::Pending,
            claimed_by: None,
            result: None,
            claimed_at_ms: None,
            completed_at_ms: None,
        });
        Ok(())
    }

    /// Claim a task for a member.
    ///
    /// Returns `true` iff the task is pending and every dependency is
    /// completed. The transition happens atomically under the board
    /// lock, so at most one concurrent caller wins.
    pub fn claim(&self, id: &str, member: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("board lock poisoned");

        let deps_completed = |state: &TaskState, all: &[TaskState]| {
            state.task.depends_on.iter().all(|dep| {
                all.iter()
                    .any(|s| s.task.id == *dep && s.status == TaskStatus::Completed)
            })
        };

        let claimable = tasks
            .iter()
            .find(|state| state.task.id == id)
            .is_some_and(|state| state.status == TaskStatus::Pending && deps_completed(state, &tasks));
        if !claimable {
            return false;
        }

        if let Some(state) = tasks.iter_mut().find(|state| state.task.id == id) {
            state.status = TaskStatus::Claimed;
            state.claimed_by = Some(member.to_owned());
            state.claimed_at_ms = Some(unix_ms());
            true
        } else {
            false
        }
    }

    /// Complete a claimed task with a result.
    ///
    /// Returns `false` unless the task is currently claimed.
    pub fn complete(&self, id: &str, result: impl Into<String>) -> bool {
        let mut tasks = self.tasks.lock().expect("board lock poisoned");
        let Some(state) = tasks.iter_mut().find(|state| state.task.id == id) else {
            return false;
        };
        if state.status != TaskStatus::Claimed {
            return false;
        }
        state.status = TaskStatus::Completed;
        state.result = Some(result.into());
        state.completed_at_ms = Some(unix_ms());
        true
    }

    /// All pending tasks whose dependencies are completed.
    #[must_use]
    pub fn get_available(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().expect("board lock poisoned");
        tasks
            .iter()
            .filter(|state| {
                state.status == TaskStatus::Pending
                    && state.task.depends_on.iter().all(|dep| {
                        tasks
                            .iter()
                            .any(|s| s.task.id == *dep && s.status == TaskStatus::Completed)
                    })
            })
            .map(|state| state.task.clone())
            .collect()
    }

    /// `true` when the board is empty or every task is completed.
    #[must_use]
    pub fn is_all_completed(&self) -> bool {
        self.tasks
            .lock()
            .expect("board lock poisoned")
            .iter()
            .all(|state| state.status == TaskStatus::Completed)
    }

    /// Ids of tasks not yet completed.
    #[must_use]
    pub fn remaining_ids(&self) -> Vec<String> {
        self.tasks
            .lock()
            .expect("board lock poisoned")
            .iter()
            .filter(|state| state.status != TaskStatus::Completed)
            .map(|state| state.task.id.clone())
            .collect()
    }

    /// Number of tasks on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().expect("board lock poisoned").len()
    }

    /// Whether the board holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A serialisable snapshot of every task state, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskState> {
        self.tasks.lock().expect("board lock poisoned").clone()
    }
}
