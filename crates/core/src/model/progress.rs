use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::content::WeeklyContent;
use crate::model::ids::{CandidateId, ProgressKey, QuestionId, TaskId, WeekNumber};
use crate::segmenter::Segmenter;

/// Share of a week's percent earned by reading every chapter.
pub const READING_WEIGHT: u64 = 30;
/// Share of a week's percent earned by completing every coding task.
pub const TASK_WEIGHT: u64 = 40;
/// Share of a week's percent earned by a perfect quiz score.
pub const QUIZ_WEIGHT: u64 = 30;

/// Selected option index per question.
pub type QuizAnswers = BTreeMap<QuestionId, usize>;

/// `round(num / den)` with halves rounded up. `den` must be non-zero.
pub fn round_half_up(num: u64, den: u64) -> u64 {
    (2 * num + den) / (2 * den)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Persisted completion and quiz state for one (candidate, week).
///
/// The store owns this record; locally it is a read-through cache that only
/// changes after the store acknowledges a write. `completed_chapters` only
/// ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    candidate_id: CandidateId,
    week_number: WeekNumber,
    #[serde(default)]
    completed_chapters: BTreeSet<u32>,
    #[serde(default)]
    completed_tasks: BTreeSet<TaskId>,
    #[serde(default)]
    quiz_answers: Option<BTreeMap<QuestionId, usize>>,
    #[serde(default)]
    quiz_score: Option<u8>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// The record every (candidate, week) starts with.
    #[must_use]
    pub fn empty(key: ProgressKey) -> Self {
        Self {
            candidate_id: key.candidate,
            week_number: key.week,
            completed_chapters: BTreeSet::new(),
            completed_tasks: BTreeSet::new(),
            quiz_answers: None,
            quiz_score: None,
            updated_at: None,
        }
    }

    /// Rehydrate a record from a store.
    #[must_use]
    pub fn from_persisted(
        key: ProgressKey,
        completed_chapters: BTreeSet<u32>,
        completed_tasks: BTreeSet<TaskId>,
        quiz_answers: Option<BTreeMap<QuestionId, usize>>,
        quiz_score: Option<u8>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            candidate_id: key.candidate,
            week_number: key.week,
            completed_chapters,
            completed_tasks,
            quiz_answers,
            quiz_score: quiz_score.map(|s| s.min(100)),
            updated_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.candidate_id, self.week_number)
    }

    #[must_use]
    pub fn candidate_id(&self) -> CandidateId {
        self.candidate_id
    }

    #[must_use]
    pub fn week_number(&self) -> WeekNumber {
        self.week_number
    }

    #[must_use]
    pub fn completed_chapters(&self) -> &BTreeSet<u32> {
        &self.completed_chapters
    }

    #[must_use]
    pub fn completed_tasks(&self) -> &BTreeSet<TaskId> {
        &self.completed_tasks
    }

    #[must_use]
    pub fn quiz_answers(&self) -> Option<&BTreeMap<QuestionId, usize>> {
        self.quiz_answers.as_ref()
    }

    #[must_use]
    pub fn quiz_score(&self) -> Option<u8> {
        self.quiz_score
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    #[must_use]
    pub fn is_chapter_completed(&self, ordinal: u32) -> bool {
        self.completed_chapters.contains(&ordinal)
    }

    /// Union the given chapters into the completed set.
    ///
    /// Returns `true` if the set grew. Chapters are never removed.
    pub fn merge_chapters(&mut self, chapters: impl IntoIterator<Item = u32>) -> bool {
        let before = self.completed_chapters.len();
        self.completed_chapters.extend(chapters);
        self.completed_chapters.len() != before
    }

    /// Returns `true` if the task was not already recorded.
    pub fn insert_task(&mut self, task: TaskId) -> bool {
        self.completed_tasks.insert(task)
    }

    /// Replace the stored answers together with the score graded from them.
    pub fn record_quiz(&mut self, answers: BTreeMap<QuestionId, usize>, score: u8) {
        self.quiz_answers = Some(answers);
        self.quiz_score = Some(score.min(100));
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

//
// ─── WEEK / OVERALL SCORING ────────────────────────────────────────────────────
//

/// Denominators needed to score one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekTotals {
    pub chapters: u32,
    pub tasks: u32,
    pub questions: u32,
}

impl WeekTotals {
    /// Count what the week offers. Pending parts count as zero.
    #[must_use]
    pub fn from_content(content: &WeeklyContent, segmenter: &Segmenter) -> Self {
        let chapters = content
            .reading()
            .map_or(0, |reading| segmenter.segment(&reading.title, &reading.content).len());
        let tasks = content.tasks().map_or(0, <[_]>::len);
        let questions = content.questions().map_or(0, <[_]>::len);
        Self {
            chapters: u32::try_from(chapters).unwrap_or(u32::MAX),
            tasks: u32::try_from(tasks).unwrap_or(u32::MAX),
            questions: u32::try_from(questions).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekProgress {
    pub week_number: WeekNumber,
    pub percent: u8,
    pub is_complete: bool,
    /// Unrounded percent as `(num, den)`; absent on deserialized rows.
    #[serde(skip)]
    exact: Option<(u64, u64)>,
}

impl WeekProgress {
    /// Weighted percent for one week: reading 30, tasks 40, quiz 30.
    ///
    /// Each component is the completed fraction capped at 1. A week with no
    /// content or no record scores 0.
    #[must_use]
    pub fn score(
        week_number: WeekNumber,
        totals: Option<WeekTotals>,
        record: Option<&ProgressRecord>,
    ) -> Self {
        let (Some(totals), Some(record)) = (totals, record) else {
            return Self {
                week_number,
                percent: 0,
                is_complete: false,
                exact: Some((0, 1)),
            };
        };

        let chapters_den = u64::from(totals.chapters.max(1));
        let tasks_den = u64::from(totals.tasks.max(1));

        let chapters_done = record
            .completed_chapters()
            .iter()
            .filter(|ordinal| **ordinal < totals.chapters)
            .count() as u64;
        let tasks_done = if totals.tasks == 0 {
            0
        } else {
            (record.completed_tasks().len() as u64).min(u64::from(totals.tasks))
        };
        let quiz_points = if totals.questions == 0 {
            0
        } else {
            u64::from(record.quiz_score().unwrap_or(0).min(100))
        };

        let num = READING_WEIGHT * chapters_done * tasks_den * 100
            + TASK_WEIGHT * tasks_done * chapters_den * 100
            + QUIZ_WEIGHT * quiz_points * chapters_den * tasks_den;
        let den = chapters_den * tasks_den * 100;
        let num = num.min(100 * den);
        let percent = u8::try_from(round_half_up(num, den)).unwrap_or(100);

        Self {
            week_number,
            percent,
            is_complete: percent == 100,
            exact: Some((num, den)),
        }
    }

    fn exact_share(&self) -> (u128, u128) {
        self.exact.map_or((u128::from(self.percent), 1), |(num, den)| {
            (u128::from(num), u128::from(den))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallProgress {
    pub per_week: Vec<WeekProgress>,
    pub overall_percent: u8,
}

impl OverallProgress {
    /// Mean of the unrounded week percents, rounded half up once; 0 for an
    /// empty plan.
    #[must_use]
    pub fn from_weeks(mut per_week: Vec<WeekProgress>) -> Self {
        per_week.sort_by_key(|w| w.week_number);
        let overall_percent = if per_week.is_empty() {
            0
        } else {
            let mean = exact_mean(&per_week).unwrap_or_else(|| {
                let sum: u64 = per_week.iter().map(|w| u64::from(w.percent)).sum();
                u128::from(round_half_up(sum, per_week.len() as u64))
            });
            u8::try_from(mean.min(100)).unwrap_or(100)
        };
        Self {
            per_week,
            overall_percent,
        }
    }
}

/// Rounded mean of the exact week shares, or `None` on overflow.
fn exact_mean(weeks: &[WeekProgress]) -> Option<u128> {
    let (mut num, mut den) = (0u128, 1u128);
    for week in weeks {
        let (n, d) = week.exact_share();
        num = num.checked_mul(d)?.checked_add(n.checked_mul(den)?)?;
        den = den.checked_mul(d)?;
        let g = gcd(num, den);
        num /= g;
        den /= g;
    }
    let den = den.checked_mul(weeks.len() as u128)?;
    Some(num.checked_mul(2)?.checked_add(den)? / den.checked_mul(2)?)
}
