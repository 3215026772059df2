//! Completion tracking for a week's coding tasks.
//!
//! Tasks carry no ordering constraints; the tracker only guarantees that a
//! task is recorded once.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::{CodingTask, TaskId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    #[error("task {0} is not part of this week")]
    UnknownTask(TaskId),
}

/// What completing a task requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// Already recorded; nothing to persist.
    AlreadyComplete,
    /// Persist this completion, then call [`TaskTracker::confirm`].
    Submit(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTracker {
    known: Vec<TaskId>,
    completed: BTreeSet<TaskId>,
}

impl TaskTracker {
    #[must_use]
    pub fn new(tasks: &[CodingTask], completed: &BTreeSet<TaskId>) -> Self {
        Self {
            known: tasks.iter().map(|t| t.id.clone()).collect(),
            completed: completed.clone(),
        }
    }

    /// Decide whether `id` needs a store write.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::UnknownTask` if the week has no such task.
    pub fn request_completion(&self, id: &TaskId) -> Result<TaskTransition, TaskError> {
        if !self.known.contains(id) {
            return Err(TaskError::UnknownTask(id.clone()));
        }
        if self.completed.contains(id) {
            Ok(TaskTransition::AlreadyComplete)
        } else {
            Ok(TaskTransition::Submit(id.clone()))
        }
    }

    /// Record a completion the store acknowledged. Returns `true` if new.
    pub fn confirm(&mut self, id: TaskId) -> bool {
        self.completed.insert(id)
    }

    #[must_use]
    pub fn is_completed(&self, id: &TaskId) -> bool {
        self.completed.contains(id)
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.known.len()
    }

    /// Known tasks not completed yet, in week order.
    #[must_use]
    pub fn remaining(&self) -> Vec<&TaskId> {
        self.known
            .iter()
            .filter(|id| !self.completed.contains(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> CodingTask {
        CodingTask {
            id: TaskId::new(id),
            title: format!("Task {id}"),
            description: String::new(),
            difficulty: "beginner".into(),
            estimated_time: "1h".into(),
            files_to_modify: vec!["db/db_impl.cc".into()],
            hints: Vec::new(),
            reason: None,
        }
    }

    #[test]
    fn completing_twice_records_once() {
        let mut tracker = TaskTracker::new(&[task("a"), task("b")], &BTreeSet::new());
        let id = TaskId::new("a");

        assert_eq!(
            tracker.request_completion(&id).unwrap(),
            TaskTransition::Submit(id.clone())
        );
        assert!(tracker.confirm(id.clone()));
        assert_eq!(
            tracker.request_completion(&id).unwrap(),
            TaskTransition::AlreadyComplete
        );
        assert!(!tracker.confirm(id.clone()));
        assert_eq!(tracker.completed().iter().filter(|t| **t == id).count(), 1);
    }

    #[test]
    fn unknown_task_is_rejected() {
        let tracker = TaskTracker::new(&[task("a")], &BTreeSet::new());
        assert_eq!(
            tracker.request_completion(&TaskId::new("zzz")),
            Err(TaskError::UnknownTask(TaskId::new("zzz")))
        );
    }

    #[test]
    fn tasks_complete_in_any_order() {
        let mut tracker = TaskTracker::new(&[task("a"), task("b"), task("c")], &BTreeSet::new());
        tracker.confirm(TaskId::new("c"));
        assert_eq!(tracker.remaining(), vec![&TaskId::new("a"), &TaskId::new("b")]);
        assert_eq!(tracker.total(), 3);
    }

    #[test]
    fn persisted_completions_are_loaded() {
        let done: BTreeSet<_> = [TaskId::new("b")].into_iter().collect();
        let tracker = TaskTracker::new(&[task("a"), task("b")], &done);
        assert!(tracker.is_completed(&TaskId::new("b")));
        assert!(!tracker.is_completed(&TaskId::new("a")));
    }
}
