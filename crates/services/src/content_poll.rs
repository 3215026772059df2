//! Waiting for a week's content to finish generating.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;

use curriculum_core::model::{CandidateId, WeekNumber, WeeklyContent};
use storage::repository::{ContentSource, StorageError};

use crate::config::PollPolicy;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PollError {
    #[error("polling was cancelled")]
    Cancelled,
    #[error("content still not ready after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Stops a running [`wait_for_content`]. Clones share one signal.
#[derive(Debug, Clone)]
pub struct PollCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PollCanceller {
    fn default() -> Self {
        Self::new()
    }
}

impl PollCanceller {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Poll `source` until every part of the week is ready.
///
/// A missing week counts as not ready yet. Waits grow by
/// `policy.multiplier` up to `policy.max_delay_ms`, each with up to
/// `policy.jitter_ms` of random delay added.
///
/// # Errors
///
/// Returns `PollError::Cancelled` once `cancel` fires, `Exhausted` after
/// `policy.max_attempts` fetches, or `Storage` for any other store failure.
pub async fn wait_for_content(
    source: &dyn ContentSource,
    candidate: CandidateId,
    week: WeekNumber,
    policy: &PollPolicy,
    cancel: &PollCanceller,
) -> Result<WeeklyContent, PollError> {
    let mut signal = cancel.tx.subscribe();

    for attempt in 0..policy.max_attempts {
        if *signal.borrow() {
            return Err(PollError::Cancelled);
        }

        match source.fetch_weekly_content(candidate, week).await {
            Ok(content) if content.is_ready() => {
                tracing::info!(candidate = %candidate, week = %week, attempt, "content ready");
                return Ok(content);
            }
            Ok(content) => tracing::debug!(
                candidate = %candidate,
                week = %week,
                attempt,
                missing = ?content.missing_parts(),
                "content still generating"
            ),
            Err(StorageError::NotFound) => tracing::debug!(
                candidate = %candidate,
                week = %week,
                attempt,
                "week not created yet"
            ),
            Err(e) => return Err(e.into()),
        }

        if attempt + 1 == policy.max_attempts {
            break;
        }

        let delay = policy.backoff(attempt) + jitter(policy.jitter_ms);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = signal.wait_for(|cancelled| *cancelled) => return Err(PollError::Cancelled),
        }
    }

    tracing::warn!(
        candidate = %candidate,
        week = %week,
        attempts = policy.max_attempts,
        "gave up waiting for content"
    );
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use curriculum_core::model::{QuizQuestion, ReadingMaterial, Readiness};

    /// Reports the week missing, then pending, then ready from call `ready_at`.
    struct Generating {
        calls: AtomicU32,
        ready_at: u32,
    }

    impl Generating {
        fn new(ready_at: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_at,
            }
        }
    }

    #[async_trait]
    impl ContentSource for Generating {
        async fn fetch_weekly_content(
            &self,
            _candidate: CandidateId,
            week: WeekNumber,
        ) -> Result<WeeklyContent, StorageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                return Err(StorageError::NotFound);
            }
            let mut content = WeeklyContent::pending(week);
            if call >= self.ready_at {
                content.reading_material = Readiness::Ready(ReadingMaterial {
                    title: "T".into(),
                    content: "## A\na".into(),
                    key_concepts: Vec::new(),
                    resources: Vec::new(),
                });
                content.coding_tasks = Readiness::Ready(Vec::new());
                content.quiz = Readiness::Ready(Vec::<QuizQuestion>::new());
            }
            Ok(content)
        }

        async fn plan_weeks(&self, _candidate: CandidateId) -> Result<Vec<WeekNumber>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            ..PollPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_every_part_is_ready() {
        let source = Generating::new(3);
        let content = wait_for_content(
            &source,
            CandidateId::new(1),
            WeekNumber::new(1),
            &policy(10),
            &PollCanceller::new(),
        )
        .await
        .unwrap();
        assert!(content.is_ready());
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let source = Generating::new(u32::MAX);
        let err = wait_for_content(
            &source,
            CandidateId::new(1),
            WeekNumber::new(1),
            &policy(4),
            &PollCanceller::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Exhausted { attempts: 4 }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let source = Generating::new(u32::MAX);
        let cancel = PollCanceller::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = wait_for_content(
            &source,
            CandidateId::new(1),
            WeekNumber::new(1),
            &policy(30),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Cancelled));
        assert!(cancel.is_cancelled());
        assert!(source.calls.load(Ordering::SeqCst) < 30);
    }

    #[tokio::test]
    async fn already_cancelled_never_fetches() {
        let source = Generating::new(0);
        let cancel = PollCanceller::new();
        cancel.cancel();
        let err = wait_for_content(
            &source,
            CandidateId::new(1),
            WeekNumber::new(1),
            &policy(3),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Cancelled));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
