use async_trait::async_trait;
use curriculum_core::Clock;
use curriculum_core::grader::{self, GradeError};
use curriculum_core::model::{
    CandidateId, OverallProgress, ProgressKey, ProgressRecord, QuestionId, TaskId, WeekNumber,
    WeekProgress, WeekTotals, WeeklyContent,
};
use curriculum_core::segmenter::Segmenter;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("store responded with status {0}")]
    Status(u16),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Acknowledgment of a quiz submission.
///
/// `score` is the store's authoritative percent when the store reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuizAck {
    pub score: Option<u8>,
}

/// The persisted progress boundary.
///
/// Every call is an independent request/response exchange. Writes are
/// idempotent so a caller can safely re-issue one after a failure.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the record for a key, or an empty one if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or decoded.
    async fn fetch_progress(&self, key: ProgressKey) -> Result<ProgressRecord, StorageError>;

    /// Per-week percents and the overall percent for a candidate's plan.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or decoded.
    async fn fetch_overall_progress(
        &self,
        candidate: CandidateId,
    ) -> Result<OverallProgress, StorageError>;

    /// Mark a chapter complete and return the updated completed set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the chapter's predecessor is not
    /// completed, or other storage errors.
    async fn mark_chapter_complete(
        &self,
        key: ProgressKey,
        chapter: u32,
    ) -> Result<BTreeSet<u32>, StorageError>;

    /// Store answers, given in question order. The store grades them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Rejected` if the answers do not fit the quiz.
    async fn submit_quiz(&self, key: ProgressKey, answers: &[usize])
    -> Result<QuizAck, StorageError>;

    /// Record a task completion. Recording it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn complete_task(&self, key: ProgressKey, task: &TaskId) -> Result<(), StorageError>;
}

/// Read access to generated weekly content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the week is not part of the plan.
    async fn fetch_weekly_content(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<WeeklyContent, StorageError>;

    /// Weeks of the candidate's plan, ascending.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn plan_weeks(&self, candidate: CandidateId) -> Result<Vec<WeekNumber>, StorageError>;
}

//
// ─── STORE RULES ───────────────────────────────────────────────────────────────
//
// Shared by the stores that own their data (memory, SQLite).

/// Add `chapter` to the record's completed set.
///
/// Refuses a chapter whose predecessor is missing so persisted sets stay
/// prefix-closed. Returns whether the set grew.
pub(crate) fn apply_chapter_completion(
    record: &mut ProgressRecord,
    chapter: u32,
) -> Result<bool, StorageError> {
    if chapter > 0 && !record.is_chapter_completed(chapter - 1) {
        return Err(StorageError::Conflict(format!(
            "chapter {chapter} completed before chapter {}",
            chapter - 1
        )));
    }
    Ok(record.merge_chapters([chapter]))
}

pub(crate) fn grade_submission(
    content: &WeeklyContent,
    answers: &[usize],
) -> Result<(BTreeMap<QuestionId, usize>, u8), StorageError> {
    let questions = content
        .questions()
        .ok_or_else(|| StorageError::Rejected("quiz not generated yet".into()))?;
    let mapped = grader::answers_from_ordered(questions, answers).map_err(rejected)?;
    let graded = grader::grade(questions, &mapped).map_err(rejected)?;
    Ok((mapped, graded.score))
}

fn rejected(err: GradeError) -> StorageError {
    StorageError::Rejected(err.to_string())
}

pub(crate) fn overall_from(
    weeks: Vec<(WeekNumber, Option<WeeklyContent>, Option<ProgressRecord>)>,
    segmenter: &Segmenter,
) -> OverallProgress {
    let per_week = weeks
        .into_iter()
        .map(|(week, content, record)| {
            let totals = content
                .as_ref()
                .map(|c| WeekTotals::from_content(c, segmenter));
            WeekProgress::score(week, totals, record.as_ref())
        })
        .collect();
    OverallProgress::from_weeks(per_week)
}

//
// ─── IN-MEMORY STORE ───────────────────────────────────────────────────────────
//

/// In-memory store for tests and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    clock: Clock,
    segmenter: Segmenter,
    content: Arc<Mutex<HashMap<(CandidateId, WeekNumber), WeeklyContent>>>,
    progress: Arc<Mutex<HashMap<ProgressKey, ProgressRecord>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Insert or replace a week of generated content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn put_weekly_content(
        &self,
        candidate: CandidateId,
        content: WeeklyContent,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .content
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((candidate, content.week_number), content);
        Ok(())
    }

    fn with_record<T>(
        &self,
        key: ProgressKey,
        f: impl FnOnce(&mut ProgressRecord) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard
            .entry(key)
            .or_insert_with(|| ProgressRecord::empty(key));
        f(record)
    }

    fn content_for(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<Option<WeeklyContent>, StorageError> {
        let guard = self
            .content
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(candidate, week)).cloned())
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn fetch_progress(&self, key: ProgressKey) -> Result<ProgressRecord, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ProgressRecord::empty(key)))
    }

    async fn fetch_overall_progress(
        &self,
        candidate: CandidateId,
    ) -> Result<OverallProgress, StorageError> {
        let weeks = self.plan_weeks(candidate).await?;
        let mut rows = Vec::with_capacity(weeks.len());
        for week in weeks {
            let content = self.content_for(candidate, week)?;
            let record = {
                let guard = self
                    .progress
                    .lock()
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
                guard.get(&ProgressKey::new(candidate, week)).cloned()
            };
            rows.push((week, content, record));
        }
        Ok(overall_from(rows, &self.segmenter))
    }

    async fn mark_chapter_complete(
        &self,
        key: ProgressKey,
        chapter: u32,
    ) -> Result<BTreeSet<u32>, StorageError> {
        let now = self.clock.now();
        self.with_record(key, |record| {
            if apply_chapter_completion(record, chapter)? {
                record.touch(now);
            }
            Ok(record.completed_chapters().clone())
        })
    }

    async fn submit_quiz(
        &self,
        key: ProgressKey,
        answers: &[usize],
    ) -> Result<QuizAck, StorageError> {
        let content = self
            .content_for(key.candidate, key.week)?
            .ok_or(StorageError::NotFound)?;
        let (mapped, score) = grade_submission(&content, answers)?;
        let now = self.clock.now();
        self.with_record(key, |record| {
            record.record_quiz(mapped, score);
            record.touch(now);
            Ok(QuizAck { score: Some(score) })
        })
    }

    async fn complete_task(&self, key: ProgressKey, task: &TaskId) -> Result<(), StorageError> {
        let now = self.clock.now();
        self.with_record(key, |record| {
            if record.insert_task(task.clone()) {
                record.touch(now);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ContentSource for InMemoryStore {
    async fn fetch_weekly_content(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<WeeklyContent, StorageError> {
        self.content_for(candidate, week)?
            .ok_or(StorageError::NotFound)
    }

    async fn plan_weeks(&self, candidate: CandidateId) -> Result<Vec<WeekNumber>, StorageError> {
        let guard = self
            .content
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut weeks: Vec<WeekNumber> = guard
            .keys()
            .filter(|(c, _)| *c == candidate)
            .map(|(_, w)| *w)
            .collect();
        weeks.sort();
        Ok(weeks)
    }
}

/// Store handles behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressStore>,
    pub content: Arc<dyn ContentSource>,
}

impl Storage {
    /// Share one backend for both roles.
    #[must_use]
    pub fn from_store<S>(store: S) -> Self
    where
        S: ProgressStore + ContentSource + Clone + 'static,
    {
        let progress: Arc<dyn ProgressStore> = Arc::new(store.clone());
        let content: Arc<dyn ContentSource> = Arc::new(store);
        Self { progress, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curriculum_core::model::{QuizQuestion, ReadingMaterial, Readiness};
    use curriculum_core::time::{fixed_clock, fixed_now};

    fn key() -> ProgressKey {
        ProgressKey::new(CandidateId::new(1), WeekNumber::new(1))
    }

    fn week_with_quiz() -> WeeklyContent {
        let mut content = WeeklyContent::pending(WeekNumber::new(1));
        content.reading_material = Readiness::Ready(ReadingMaterial {
            title: "Week 1".into(),
            content: "## A\na\n## B\nb\n## C\nc\n## D\nd".into(),
            key_concepts: Vec::new(),
            resources: Vec::new(),
        });
        content.coding_tasks = Readiness::Ready(Vec::new());
        content.quiz = Readiness::Ready(
            (0..4)
                .map(|i| QuizQuestion {
                    id: QuestionId::new(format!("q{i}")),
                    question: String::new(),
                    options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_answer: i,
                    explanation: String::new(),
                })
                .collect(),
        );
        content
    }

    #[tokio::test]
    async fn unknown_key_fetches_empty_record() {
        let store = InMemoryStore::new();
        let record = store.fetch_progress(key()).await.unwrap();
        assert_eq!(record, ProgressRecord::empty(key()));
    }

    #[tokio::test]
    async fn chapter_completion_is_idempotent_and_stamped() {
        let store = InMemoryStore::new().with_clock(fixed_clock());
        let first = store.mark_chapter_complete(key(), 0).await.unwrap();
        let second = store.mark_chapter_complete(key(), 0).await.unwrap();
        assert_eq!(first, second);

        let record = store.fetch_progress(key()).await.unwrap();
        assert_eq!(record.updated_at(), Some(fixed_now()));
    }

    #[tokio::test]
    async fn chapter_without_predecessor_conflicts() {
        let store = InMemoryStore::new();
        let err = store.mark_chapter_complete(key(), 2).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(store
            .fetch_progress(key())
            .await
            .unwrap()
            .completed_chapters()
            .is_empty());
    }

    #[tokio::test]
    async fn quiz_is_graded_by_the_store() {
        let store = InMemoryStore::new();
        store
            .put_weekly_content(CandidateId::new(1), week_with_quiz())
            .unwrap();

        let ack = store.submit_quiz(key(), &[0, 1, 2, 0]).await.unwrap();
        assert_eq!(ack.score, Some(75));

        let record = store.fetch_progress(key()).await.unwrap();
        assert_eq!(record.quiz_score(), Some(75));
        assert_eq!(record.quiz_answers().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn short_quiz_submission_is_rejected() {
        let store = InMemoryStore::new();
        store
            .put_weekly_content(CandidateId::new(1), week_with_quiz())
            .unwrap();
        let err = store.submit_quiz(key(), &[0]).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
        assert_eq!(store.fetch_progress(key()).await.unwrap().quiz_score(), None);
    }

    #[tokio::test]
    async fn overall_progress_covers_every_planned_week() {
        let store = InMemoryStore::new();
        let candidate = CandidateId::new(1);
        store.put_weekly_content(candidate, week_with_quiz()).unwrap();
        store
            .put_weekly_content(candidate, WeeklyContent::pending(WeekNumber::new(2)))
            .unwrap();

        store.mark_chapter_complete(key(), 0).await.unwrap();
        store.mark_chapter_complete(key(), 1).await.unwrap();
        store.submit_quiz(key(), &[0, 1, 2, 3]).await.unwrap();

        let overall = store.fetch_overall_progress(candidate).await.unwrap();
        assert_eq!(overall.per_week.len(), 2);
        // reading 30 + no tasks 0 + quiz 30
        assert_eq!(overall.per_week[0].percent, 60);
        assert_eq!(overall.per_week[1].percent, 0);
        assert_eq!(overall.overall_percent, 30);
    }

    #[tokio::test]
    async fn task_completion_is_a_set_insert() {
        let store = InMemoryStore::new();
        let task = TaskId::new("t1");
        store.complete_task(key(), &task).await.unwrap();
        store.complete_task(key(), &task).await.unwrap();
        let record = store.fetch_progress(key()).await.unwrap();
        assert_eq!(record.completed_tasks().len(), 1);
    }
}
