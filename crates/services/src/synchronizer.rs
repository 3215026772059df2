//! The only write path to the progress store.
//!
//! Writes for one (candidate, week) run one at a time: each takes the key's
//! async mutex for the duration of the store call. Reads are not serialized.
//! Nothing is retried here; failures go back to the caller unchanged.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as KeyMap, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use curriculum_core::model::{CandidateId, OverallProgress, ProgressKey, ProgressRecord, TaskId};
use storage::repository::{ProgressStore, QuizAck, StorageError};

#[derive(Clone)]
pub struct ProgressSynchronizer {
    store: Arc<dyn ProgressStore>,
    locks: Locks,
}

type Locks = Arc<KeyMap<HashMap<ProgressKey, Arc<Mutex<()>>>>>;

/// Holds a key's write lock; the key's entry is dropped once nobody else
/// holds or waits on it.
struct WriteGuard {
    key: ProgressKey,
    locks: Locks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl ProgressSynchronizer {
    #[must_use]
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyMap::new(HashMap::new())),
        }
    }

    async fn write_lock(&self, key: ProgressKey) -> WriteGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = lock.lock_owned().await;
        WriteGuard {
            key,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store call fails.
    pub async fn fetch_progress(&self, key: ProgressKey) -> Result<ProgressRecord, StorageError> {
        self.store
            .fetch_progress(key)
            .await
            .inspect_err(|e| log_failure("fetch_progress", key, e))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store call fails.
    pub async fn fetch_overall_progress(
        &self,
        candidate: CandidateId,
    ) -> Result<OverallProgress, StorageError> {
        self.store
            .fetch_overall_progress(candidate)
            .await
            .inspect_err(|e| {
                tracing::warn!(candidate = %candidate, error = %e, "fetch_overall_progress failed");
            })
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store call fails.
    pub async fn mark_chapter_complete(
        &self,
        key: ProgressKey,
        chapter: u32,
    ) -> Result<BTreeSet<u32>, StorageError> {
        let _guard = self.write_lock(key).await;
        let confirmed = self
            .store
            .mark_chapter_complete(key, chapter)
            .await
            .inspect_err(|e| log_failure("mark_chapter_complete", key, e))?;
        tracing::debug!(
            candidate = %key.candidate,
            week = %key.week,
            chapter,
            completed = confirmed.len(),
            "chapter completion acknowledged"
        );
        Ok(confirmed)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store call fails.
    pub async fn submit_quiz(
        &self,
        key: ProgressKey,
        answers: &[usize],
    ) -> Result<QuizAck, StorageError> {
        let _guard = self.write_lock(key).await;
        let ack = self
            .store
            .submit_quiz(key, answers)
            .await
            .inspect_err(|e| log_failure("submit_quiz", key, e))?;
        tracing::debug!(
            candidate = %key.candidate,
            week = %key.week,
            score = ?ack.score,
            "quiz submission acknowledged"
        );
        Ok(ack)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store call fails.
    pub async fn complete_task(&self, key: ProgressKey, task: &TaskId) -> Result<(), StorageError> {
        let _guard = self.write_lock(key).await;
        self.store
            .complete_task(key, task)
            .await
            .inspect_err(|e| log_failure("complete_task", key, e))?;
        tracing::debug!(
            candidate = %key.candidate,
            week = %key.week,
            task = %task,
            "task completion acknowledged"
        );
        Ok(())
    }
}

fn log_failure(op: &'static str, key: ProgressKey, error: &StorageError) {
    tracing::warn!(
        op,
        candidate = %key.candidate,
        week = %key.week,
        error = %error,
        "progress store call failed"
    );
}
