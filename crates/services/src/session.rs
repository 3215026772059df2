//! The learner's view of one week and every action taken on it.
//!
//! `LearnerSession` owns the active (candidate, week). Opening a week bumps
//! an epoch and hands out a [`Ticket`]; fetched data and write
//! acknowledgments are applied only while their ticket is still current, so
//! a response for a week the learner has left is dropped instead of landing
//! on whatever is open now.
//!
//! Each write is three steps:
//! 1. `prepare_*` validates locally and returns a request, or `None` when
//!    the action is already done or already in flight.
//! 2. The request goes through the [`ProgressSynchronizer`].
//! 3. `apply_*` checks the ticket and reflects the store's answer. A failed
//!    call changes nothing.
//!
//! The async convenience methods (`complete_current`, `submit_quiz`, ...)
//! run all three in order.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use curriculum_core::grader::{self, GradeError, QuizGrade};
use curriculum_core::model::{
    CandidateId, Chapter, ContentPart, OverallProgress, ProgressKey, ProgressRecord, QuestionId,
    QuizAnswers, TaskId, WeekNumber, WeekProgress, WeekTotals, WeeklyContent,
};
use curriculum_core::progression::{CompletionTransition, Progression};
use curriculum_core::segmenter::Segmenter;
use curriculum_core::tasks::{TaskTracker, TaskTransition};
use storage::repository::{ContentSource, QuizAck, StorageError};

use crate::config::{CurriculumConfig, QuizResubmitPolicy};
use crate::error::{ConfigError, ErrorKind, SyncError};
use crate::synchronizer::ProgressSynchronizer;

//
// ─── TICKETS AND REQUESTS ──────────────────────────────────────────────────────
//

/// Identifies one opening of a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    key: ProgressKey,
}

impl Ticket {
    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.key
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (epoch {})", self.key, self.epoch)
    }
}

/// Content and progress fetched for a ticket.
#[derive(Debug, Clone)]
pub struct LoadedWeek {
    pub ticket: Ticket,
    pub content: WeeklyContent,
    pub record: ProgressRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterCompletion {
    ticket: Ticket,
    ordinal: u32,
}

impl ChapterCompletion {
    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.ticket.key
    }

    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCompletion {
    ticket: Ticket,
    task: TaskId,
}

impl TaskCompletion {
    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.ticket.key
    }

    #[must_use]
    pub fn task(&self) -> &TaskId {
        &self.task
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSubmission {
    ticket: Ticket,
    answers: QuizAnswers,
    ordered: Vec<usize>,
    grade: QuizGrade,
}

impl QuizSubmission {
    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.ticket.key
    }

    /// Answers in question order, as the store takes them.
    #[must_use]
    pub fn ordered_answers(&self) -> &[usize] {
        &self.ordered
    }

    /// The local grade; the store's score wins if it reports one.
    #[must_use]
    pub fn grade(&self) -> &QuizGrade {
        &self.grade
    }
}

//
// ─── WEEK SESSION ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Default)]
struct PendingWrites {
    chapters: BTreeSet<u32>,
    tasks: BTreeSet<TaskId>,
    quiz: bool,
}

/// A loaded week: chapters, gating, tasks, quiz state and the cached record.
///
/// The cached `ProgressRecord` only changes when the store acknowledges a
/// write.
#[derive(Debug, Clone)]
pub struct WeekSession {
    ticket: Ticket,
    content: WeeklyContent,
    totals: WeekTotals,
    chapters: Vec<Chapter>,
    progression: Option<Progression>,
    tasks: Option<TaskTracker>,
    selections: QuizAnswers,
    graded: Option<QuizGrade>,
    record: ProgressRecord,
    pending: PendingWrites,
}

impl WeekSession {
    fn build(loaded: LoadedWeek, segmenter: &Segmenter) -> Result<Self, SyncError> {
        let LoadedWeek {
            ticket,
            content,
            record,
        } = loaded;

        let chapters = content
            .reading()
            .map(|reading| segmenter.segment(&reading.title, &reading.content))
            .unwrap_or_default();
        let progression = if chapters.is_empty() {
            None
        } else {
            Some(Progression::new(chapters.len(), record.completed_chapters())?)
        };
        let tasks = content
            .tasks()
            .map(|tasks| TaskTracker::new(tasks, record.completed_tasks()));

        let selections = record.quiz_answers().cloned().unwrap_or_default();
        let graded = match (content.questions(), record.quiz_score()) {
            (Some(questions), Some(_)) => grader::grade(questions, &selections).ok(),
            _ => None,
        };

        Ok(Self {
            ticket,
            totals: WeekTotals::from_content(&content, segmenter),
            content,
            chapters,
            progression,
            tasks,
            selections,
            graded,
            record,
            pending: PendingWrites::default(),
        })
    }

    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.ticket.key
    }

    #[must_use]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    #[must_use]
    pub fn content(&self) -> &WeeklyContent {
        &self.content
    }

    #[must_use]
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// `None` while the reading material is pending.
    #[must_use]
    pub fn progression(&self) -> Option<&Progression> {
        self.progression.as_ref()
    }

    #[must_use]
    pub fn current_chapter(&self) -> Option<&Chapter> {
        let progression = self.progression.as_ref()?;
        self.chapters.get(progression.current_index())
    }

    /// `None` while the coding tasks are pending.
    #[must_use]
    pub fn tasks(&self) -> Option<&TaskTracker> {
        self.tasks.as_ref()
    }

    #[must_use]
    pub fn selections(&self) -> &QuizAnswers {
        &self.selections
    }

    /// Per-question results of the last acknowledged submission.
    #[must_use]
    pub fn graded(&self) -> Option<&QuizGrade> {
        self.graded.as_ref()
    }

    /// Acknowledged state as last seen from the store.
    #[must_use]
    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    #[must_use]
    pub fn progress(&self) -> WeekProgress {
        WeekProgress::score(self.key().week, Some(self.totals), Some(&self.record))
    }

    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.pending.chapters.is_empty() || !self.pending.tasks.is_empty() || self.pending.quiz
    }

    fn confirm_task(&mut self, task: TaskId) {
        self.record.insert_task(task.clone());
        if let Some(tracker) = self.tasks.as_mut() {
            tracker.confirm(task);
        }
    }

    fn progression_mut(&mut self) -> Result<&mut Progression, SyncError> {
        self.progression
            .as_mut()
            .ok_or(SyncError::NotReady(ContentPart::Reading))
    }
}

//
// ─── LEARNER SESSION ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Default)]
enum WeekState {
    #[default]
    Closed,
    Loading(Ticket),
    Ready(Box<WeekSession>),
}

pub struct LearnerSession {
    candidate: CandidateId,
    sync: ProgressSynchronizer,
    content: Arc<dyn ContentSource>,
    segmenter: Segmenter,
    auto_advance: bool,
    quiz_resubmit: QuizResubmitPolicy,
    epoch: u64,
    state: WeekState,
}

impl LearnerSession {
    #[must_use]
    pub fn new(
        candidate: CandidateId,
        sync: ProgressSynchronizer,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            candidate,
            sync,
            content,
            segmenter: Segmenter::default(),
            auto_advance: true,
            quiz_resubmit: QuizResubmitPolicy::default(),
            epoch: 0,
            state: WeekState::Closed,
        }
    }

    /// Apply the session-related settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the chapter grouping is invalid.
    pub fn with_config(self, config: &CurriculumConfig) -> Result<Self, ConfigError> {
        Ok(self
            .with_segmenter(config.segmenter()?)
            .with_auto_advance(config.auto_advance)
            .with_quiz_resubmit(config.quiz_resubmit))
    }

    #[must_use]
    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    #[must_use]
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    #[must_use]
    pub fn with_quiz_resubmit(mut self, policy: QuizResubmitPolicy) -> Self {
        self.quiz_resubmit = policy;
        self
    }

    #[must_use]
    pub fn candidate(&self) -> CandidateId {
        self.candidate
    }

    #[must_use]
    pub fn synchronizer(&self) -> &ProgressSynchronizer {
        &self.sync
    }

    /// The loaded week, if one is open and its fetch has been applied.
    #[must_use]
    pub fn week(&self) -> Option<&WeekSession> {
        match &self.state {
            WeekState::Ready(week) => Some(&**week),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.state, WeekState::Loading(_))
    }

    #[must_use]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.epoch == self.epoch
    }

    // ── opening a week ──────────────────────────────────────────────────────

    /// Switch to `week`. Until the matching `finish_open_week`, every gating
    /// action is refused with `SyncError::NotLoaded`.
    pub fn begin_open_week(&mut self, week: WeekNumber) -> Ticket {
        self.epoch += 1;
        let ticket = Ticket {
            epoch: self.epoch,
            key: ProgressKey::new(self.candidate, week),
        };
        tracing::debug!(%ticket, "opening week");
        self.state = WeekState::Loading(ticket);
        ticket
    }

    /// Fetch what `ticket` needs. Pending content parts are not errors.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if either fetch fails.
    pub async fn load_week(&self, ticket: Ticket) -> Result<LoadedWeek, SyncError> {
        let key = ticket.key;
        let content = self
            .content
            .fetch_weekly_content(key.candidate, key.week)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    candidate = %key.candidate,
                    week = %key.week,
                    error = %e,
                    "weekly content fetch failed"
                );
            })?;
        let record = self.sync.fetch_progress(key).await?;
        Ok(LoadedWeek {
            ticket,
            content,
            record,
        })
    }

    /// Apply fetched data if its ticket is still current.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stale` for an outdated ticket, or a progression
    /// error if the record cannot be laid over the chapters.
    pub fn finish_open_week(&mut self, loaded: LoadedWeek) -> Result<&WeekSession, SyncError> {
        let ticket = loaded.ticket;
        if !matches!(self.state, WeekState::Loading(t) if t == ticket) {
            return Err(stale(ticket));
        }
        let missing = loaded.content.missing_parts();
        let week = WeekSession::build(loaded, &self.segmenter)?;
        tracing::info!(
            candidate = %ticket.key.candidate,
            week = %ticket.key.week,
            chapters = week.chapters.len(),
            completed = week.record.completed_chapters().len(),
            ?missing,
            "week loaded"
        );
        self.state = WeekState::Ready(Box::new(week));
        match &self.state {
            WeekState::Ready(week) => Ok(&**week),
            _ => Err(SyncError::NotLoaded),
        }
    }

    /// Drop a load that failed, if it is still the current one.
    pub fn abandon_open_week(&mut self, ticket: Ticket) {
        if matches!(self.state, WeekState::Loading(t) if t == ticket) {
            self.state = WeekState::Closed;
        }
    }

    /// Open `week` and wait for its content and progress.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if loading fails; the session is then closed.
    pub async fn open_week(&mut self, week: WeekNumber) -> Result<&WeekSession, SyncError> {
        let ticket = self.begin_open_week(week);
        match self.load_week(ticket).await {
            Ok(loaded) => self.finish_open_week(loaded),
            Err(e) => {
                self.abandon_open_week(ticket);
                Err(e)
            }
        }
    }

    /// Reload the open week from the store.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoWeek` if nothing is open, or any load failure.
    pub async fn refresh(&mut self) -> Result<&WeekSession, SyncError> {
        let week = match &self.state {
            WeekState::Ready(week) => week.key().week,
            WeekState::Loading(ticket) => ticket.key.week,
            WeekState::Closed => return Err(SyncError::NoWeek),
        };
        self.open_week(week).await
    }

    fn ready_mut(&mut self) -> Result<&mut WeekSession, SyncError> {
        match &mut self.state {
            WeekState::Ready(week) => Ok(&mut **week),
            WeekState::Loading(_) => Err(SyncError::NotLoaded),
            WeekState::Closed => Err(SyncError::NoWeek),
        }
    }

    /// The open week, only if it came from `ticket`.
    fn current_for(&mut self, ticket: Ticket) -> Result<&mut WeekSession, SyncError> {
        match &mut self.state {
            WeekState::Ready(week) if week.ticket == ticket => Ok(&mut **week),
            _ => Err(stale(ticket)),
        }
    }

    fn ready_from(&self, ticket: Ticket) -> bool {
        matches!(&self.state, WeekState::Ready(week) if week.ticket == ticket)
    }

    /// The open week for `ticket`'s key, even if it was reloaded since.
    fn reloaded_for(&mut self, ticket: Ticket) -> Option<&mut WeekSession> {
        match &mut self.state {
            WeekState::Ready(week) if week.key() == ticket.key => Some(&mut **week),
            _ => None,
        }
    }

    // ── local actions ───────────────────────────────────────────────────────

    /// Move to chapter `index` if it is not locked.
    ///
    /// # Errors
    ///
    /// Returns a validation `SyncError`; state is unchanged.
    pub fn navigate(&mut self, index: usize) -> Result<(), SyncError> {
        let candidate = self.candidate;
        let week = self.ready_mut().map_err(rejected)?;
        week.progression_mut()
            .map_err(rejected)?
            .navigate(index)
            .map_err(|e| rejected(e.into()))?;
        tracing::debug!(candidate = %candidate, week = %week.key().week, chapter = index, "navigated");
        Ok(())
    }

    /// Record a selection for `question`. Nothing is sent until submission.
    ///
    /// # Errors
    ///
    /// Returns a validation `SyncError` for an unknown question or option,
    /// `NotReady` while the quiz is pending, and `QuizAlreadySubmitted` when
    /// resubmission is rejected.
    pub fn select_answer(&mut self, question: &QuestionId, option: usize) -> Result<(), SyncError> {
        let policy = self.quiz_resubmit;
        let week = self.ready_mut().map_err(rejected)?;
        let questions = week
            .content
            .questions()
            .ok_or(SyncError::NotReady(ContentPart::Quiz))
            .map_err(rejected)?;
        let Some(q) = questions.iter().find(|q| &q.id == question) else {
            return Err(rejected(SyncError::UnknownQuestion(question.to_string())));
        };
        if option >= q.options.len() {
            return Err(rejected(
                GradeError::OptionOutOfRange {
                    question: question.clone(),
                    selected: option,
                    options: q.options.len(),
                }
                .into(),
            ));
        }
        if policy == QuizResubmitPolicy::Reject && week.record.quiz_score().is_some() {
            return Err(rejected(SyncError::QuizAlreadySubmitted));
        }
        week.selections.insert(question.clone(), option);
        Ok(())
    }

    // ── chapter completion ──────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a validation `SyncError` if the current chapter is locked or
    /// the week is not loaded.
    pub fn prepare_complete_current(&mut self) -> Result<Option<ChapterCompletion>, SyncError> {
        let week = self.ready_mut().map_err(rejected)?;
        let transition = week
            .progression_mut()
            .map_err(rejected)?
            .request_completion()
            .map_err(|e| rejected(e.into()))?;
        Ok(queue_chapter(week, transition))
    }

    /// # Errors
    ///
    /// Returns a validation `SyncError` if chapter `index` is missing or
    /// locked, or the week is not loaded.
    pub fn prepare_complete_chapter(
        &mut self,
        index: usize,
    ) -> Result<Option<ChapterCompletion>, SyncError> {
        let week = self.ready_mut().map_err(rejected)?;
        let transition = week
            .progression_mut()
            .map_err(rejected)?
            .request_completion_at(index)
            .map_err(|e| rejected(e.into()))?;
        Ok(queue_chapter(week, transition))
    }

    /// Reflect the store's answer to `request`.
    ///
    /// A successful ack for a week that was reloaded since is merged into
    /// the reloaded state without moving the current chapter.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stale` if another week is open or loading, or
    /// `SyncError::Storage` if the call failed.
    pub fn apply_chapter_completion(
        &mut self,
        request: ChapterCompletion,
        result: Result<BTreeSet<u32>, StorageError>,
    ) -> Result<(), SyncError> {
        if !self.ready_from(request.ticket) {
            return self.merge_late_chapters(request, result);
        }
        let auto_advance = self.auto_advance;
        let week = self.current_for(request.ticket).map_err(rejected)?;
        week.pending.chapters.remove(&request.ordinal);
        let confirmed = result?;

        week.record
            .merge_chapters(confirmed.iter().copied().chain([request.ordinal]));
        week.progression_mut()?
            .confirm_completion(request.ordinal, &confirmed, auto_advance)?;
        tracing::info!(
            candidate = %request.ticket.key.candidate,
            week = %request.ticket.key.week,
            chapter = request.ordinal,
            "chapter completed"
        );
        Ok(())
    }

    fn merge_late_chapters(
        &mut self,
        request: ChapterCompletion,
        result: Result<BTreeSet<u32>, StorageError>,
    ) -> Result<(), SyncError> {
        let ticket = request.ticket;
        let (Ok(confirmed), Some(week)) = (result, self.reloaded_for(ticket)) else {
            return Err(rejected(stale(ticket)));
        };
        week.record
            .merge_chapters(confirmed.iter().copied().chain([request.ordinal]));
        week.progression_mut()?
            .confirm_completion(request.ordinal, &confirmed, false)?;
        tracing::debug!(
            candidate = %ticket.key.candidate,
            week = %ticket.key.week,
            chapter = request.ordinal,
            "late chapter ack merged into reloaded week"
        );
        Ok(())
    }

    /// Complete the current chapter. Returns whether a write was issued.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` for validation, staleness or store failures.
    pub async fn complete_current(&mut self) -> Result<bool, SyncError> {
        let Some(request) = self.prepare_complete_current()? else {
            return Ok(false);
        };
        let result = self
            .sync
            .mark_chapter_complete(request.key(), request.ordinal)
            .await;
        self.apply_chapter_completion(request, result)?;
        Ok(true)
    }

    /// Complete chapter `index`. Returns whether a write was issued.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` for validation, staleness or store failures.
    pub async fn complete_chapter(&mut self, index: usize) -> Result<bool, SyncError> {
        let Some(request) = self.prepare_complete_chapter(index)? else {
            return Ok(false);
        };
        let result = self
            .sync
            .mark_chapter_complete(request.key(), request.ordinal)
            .await;
        self.apply_chapter_completion(request, result)?;
        Ok(true)
    }

    // ── tasks ───────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `NotReady` while tasks are pending, or `Task` for an unknown id.
    pub fn prepare_complete_task(
        &mut self,
        task: &TaskId,
    ) -> Result<Option<TaskCompletion>, SyncError> {
        let week = self.ready_mut().map_err(rejected)?;
        let tracker = week
            .tasks
            .as_ref()
            .ok_or(SyncError::NotReady(ContentPart::Tasks))
            .map_err(rejected)?;
        match tracker
            .request_completion(task)
            .map_err(|e| rejected(e.into()))?
        {
            TaskTransition::AlreadyComplete => Ok(None),
            TaskTransition::Submit(task) => {
                if !week.pending.tasks.insert(task.clone()) {
                    return Ok(None);
                }
                Ok(Some(TaskCompletion {
                    ticket: week.ticket,
                    task,
                }))
            }
        }
    }

    /// A successful ack for a week that was reloaded since is merged into
    /// the reloaded state.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stale` if another week is open or loading, or
    /// `SyncError::Storage` if the call failed.
    pub fn apply_task_completion(
        &mut self,
        request: TaskCompletion,
        result: Result<(), StorageError>,
    ) -> Result<(), SyncError> {
        if !self.ready_from(request.ticket) {
            let ticket = request.ticket;
            let (Ok(()), Some(week)) = (result, self.reloaded_for(ticket)) else {
                return Err(rejected(stale(ticket)));
            };
            week.confirm_task(request.task.clone());
            tracing::debug!(
                candidate = %ticket.key.candidate,
                week = %ticket.key.week,
                task = %request.task,
                "late task ack merged into reloaded week"
            );
            return Ok(());
        }
        let week = self.current_for(request.ticket).map_err(rejected)?;
        week.pending.tasks.remove(&request.task);
        result?;

        week.confirm_task(request.task.clone());
        tracing::info!(
            candidate = %request.ticket.key.candidate,
            week = %request.ticket.key.week,
            task = %request.task,
            "task completed"
        );
        Ok(())
    }

    /// Mark `task` done. Returns whether a write was issued.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` for validation, staleness or store failures.
    pub async fn complete_task(&mut self, task: &TaskId) -> Result<bool, SyncError> {
        let Some(request) = self.prepare_complete_task(task)? else {
            return Ok(false);
        };
        let result = self.sync.complete_task(request.key(), &request.task).await;
        self.apply_task_completion(request, result)?;
        Ok(true)
    }

    // ── quiz ────────────────────────────────────────────────────────────────

    /// Grade the selections locally and build the submission.
    ///
    /// # Errors
    ///
    /// Returns a `Grade` error if any question is unanswered, `NotReady`
    /// while the quiz is pending, or `QuizAlreadySubmitted` when
    /// resubmission is rejected.
    pub fn prepare_submit_quiz(&mut self) -> Result<Option<QuizSubmission>, SyncError> {
        let policy = self.quiz_resubmit;
        let week = self.ready_mut().map_err(rejected)?;
        if week.pending.quiz {
            return Ok(None);
        }
        if policy == QuizResubmitPolicy::Reject && week.record.quiz_score().is_some() {
            return Err(rejected(SyncError::QuizAlreadySubmitted));
        }
        let questions = week
            .content
            .questions()
            .ok_or(SyncError::NotReady(ContentPart::Quiz))
            .map_err(rejected)?;
        let grade = grader::grade(questions, &week.selections).map_err(|e| rejected(e.into()))?;
        let ordered =
            grader::ordered_answers(questions, &week.selections).map_err(|e| rejected(e.into()))?;

        week.pending.quiz = true;
        Ok(Some(QuizSubmission {
            ticket: week.ticket,
            answers: week.selections.clone(),
            ordered,
            grade,
        }))
    }

    /// # Errors
    ///
    /// Returns `SyncError::Stale` or `SyncError::Storage`.
    pub fn apply_quiz_submission(
        &mut self,
        request: QuizSubmission,
        result: Result<QuizAck, StorageError>,
    ) -> Result<QuizGrade, SyncError> {
        let week = self.current_for(request.ticket).map_err(rejected)?;
        week.pending.quiz = false;
        let ack = result?;

        let mut grade = request.grade;
        if let Some(score) = ack.score.filter(|s| *s != grade.score) {
            tracing::debug!(local = grade.score, store = score, "store score differs from local grade");
            grade.score = score;
        }
        week.record.record_quiz(request.answers, grade.score);
        week.graded = Some(grade.clone());
        tracing::info!(
            candidate = %request.ticket.key.candidate,
            week = %request.ticket.key.week,
            score = grade.score,
            correct = grade.correct,
            total = grade.total,
            "quiz graded"
        );
        Ok(grade)
    }

    /// Submit the current selections. Returns `None` if a submission is
    /// already in flight.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` for validation, staleness or store failures.
    pub async fn submit_quiz(&mut self) -> Result<Option<QuizGrade>, SyncError> {
        let Some(request) = self.prepare_submit_quiz()? else {
            return Ok(None);
        };
        let result = self
            .sync
            .submit_quiz(request.key(), request.ordered_answers())
            .await;
        self.apply_quiz_submission(request, result).map(Some)
    }

    // ── overall ─────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the store call fails.
    pub async fn overall_progress(&self) -> Result<OverallProgress, SyncError> {
        Ok(self.sync.fetch_overall_progress(self.candidate).await?)
    }
}

fn queue_chapter(
    week: &mut WeekSession,
    transition: CompletionTransition,
) -> Option<ChapterCompletion> {
    match transition {
        CompletionTransition::AlreadyCompleted => None,
        CompletionTransition::Submit { ordinal } => {
            if !week.pending.chapters.insert(ordinal) {
                return None;
            }
            Some(ChapterCompletion {
                ticket: week.ticket,
                ordinal,
            })
        }
    }
}

fn stale(ticket: Ticket) -> SyncError {
    SyncError::Stale { key: ticket.key }
}

/// Log a locally handled failure on its way out.
fn rejected(err: SyncError) -> SyncError {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::NotReady | ErrorKind::StaleResponse => {
            tracing::debug!(kind = ?err.kind(), error = %err, "action rejected");
        }
        ErrorKind::SyncFailure => {}
    }
    err
}
