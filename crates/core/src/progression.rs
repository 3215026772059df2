//! Chapter gating for one (candidate, week).
//!
//! Chapter `i` is reachable iff `i == 0` or chapter `i - 1` is completed.
//! Every transition goes through the guards here regardless of how the
//! request was issued, so the rule holds even for out-of-band calls.
//!
//! Completion is two-phase: [`Progression::request_completion`] decides
//! whether a store write is needed, and [`Progression::confirm_completion`]
//! applies the store's acknowledgment. Nothing changes in between.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("reading has no chapters")]
    NoChapters,

    #[error("chapter {index} does not exist ({len} chapters)")]
    OutOfRange { index: usize, len: usize },

    #[error("chapter {index} is locked")]
    Locked { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Locked,
    Unlocked,
    Completed,
}

/// What completing a chapter requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTransition {
    /// Already completed; no write may be issued.
    AlreadyCompleted,
    /// Persist completion of `ordinal`, then confirm it.
    Submit { ordinal: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progression {
    chapter_count: usize,
    statuses: Vec<ChapterStatus>,
    completed: BTreeSet<u32>,
    current: usize,
}

fn derive_status(index: usize, completed: &BTreeSet<u32>) -> ChapterStatus {
    let ordinal = u32::try_from(index).unwrap_or(u32::MAX);
    if completed.contains(&ordinal) {
        ChapterStatus::Completed
    } else if index == 0 || completed.contains(&(ordinal - 1)) {
        ChapterStatus::Unlocked
    } else {
        ChapterStatus::Locked
    }
}

impl Progression {
    /// Build the gating state from a persisted completion set.
    ///
    /// The current chapter starts at the first chapter that is not completed,
    /// or the last chapter when all are. Completed ordinals beyond
    /// `chapter_count` are kept but never displayed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NoChapters` if `chapter_count` is zero.
    pub fn new(chapter_count: usize, completed: &BTreeSet<u32>) -> Result<Self, ProgressionError> {
        if chapter_count == 0 {
            return Err(ProgressionError::NoChapters);
        }
        let mut progression = Self {
            chapter_count,
            statuses: Vec::new(),
            completed: completed.clone(),
            current: 0,
        };
        progression.recompute();
        progression.current = progression
            .statuses
            .iter()
            .position(|s| *s != ChapterStatus::Completed)
            .unwrap_or(chapter_count - 1);
        Ok(progression)
    }

    fn recompute(&mut self) {
        self.statuses = (0..self.chapter_count)
            .map(|index| derive_status(index, &self.completed))
            .collect();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chapter_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chapter_count == 0
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn status(&self, index: usize) -> Option<ChapterStatus> {
        self.statuses.get(index).copied()
    }

    #[must_use]
    pub fn statuses(&self) -> &[ChapterStatus] {
        &self.statuses
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<u32> {
        &self.completed
    }

    /// All chapters completed. Navigation stays open for review.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.statuses.iter().all(|s| *s == ChapterStatus::Completed)
    }

    #[must_use]
    pub fn can_navigate(&self, index: usize) -> bool {
        matches!(
            self.status(index),
            Some(ChapterStatus::Unlocked | ChapterStatus::Completed)
        )
    }

    /// Move to chapter `index`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` or `Locked`; the current chapter is unchanged.
    pub fn navigate(&mut self, index: usize) -> Result<(), ProgressionError> {
        match self.status(index) {
            None => Err(ProgressionError::OutOfRange {
                index,
                len: self.len(),
            }),
            Some(ChapterStatus::Locked) => Err(ProgressionError::Locked { index }),
            Some(_) => {
                self.current = index;
                Ok(())
            }
        }
    }

    /// Decide whether completing the current chapter needs a write.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Locked` if the current chapter is locked.
    pub fn request_completion(&self) -> Result<CompletionTransition, ProgressionError> {
        self.request_completion_at(self.current)
    }

    /// Decide whether completing chapter `index` needs a write.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for a missing chapter and `Locked` for one whose
    /// predecessor is not completed.
    pub fn request_completion_at(
        &self,
        index: usize,
    ) -> Result<CompletionTransition, ProgressionError> {
        match self.status(index) {
            None => Err(ProgressionError::OutOfRange {
                index,
                len: self.len(),
            }),
            Some(ChapterStatus::Locked) => Err(ProgressionError::Locked { index }),
            Some(ChapterStatus::Completed) => Ok(CompletionTransition::AlreadyCompleted),
            Some(ChapterStatus::Unlocked) => Ok(CompletionTransition::Submit {
                ordinal: u32::try_from(index).unwrap_or(u32::MAX),
            }),
        }
    }

    /// Apply an acknowledged completion.
    ///
    /// `confirmed` is the completed set the store returned; it is unioned
    /// with the local set so completions never disappear. When
    /// `auto_advance` is set and the learner is still on `ordinal`, the
    /// current chapter moves to the next one if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::OutOfRange` if `ordinal` is not a chapter.
    pub fn confirm_completion(
        &mut self,
        ordinal: u32,
        confirmed: &BTreeSet<u32>,
        auto_advance: bool,
    ) -> Result<(), ProgressionError> {
        let index = ordinal as usize;
        if index >= self.len() {
            return Err(ProgressionError::OutOfRange {
                index,
                len: self.len(),
            });
        }

        self.completed.insert(ordinal);
        self.completed.extend(confirmed.iter().copied());
        self.recompute();

        if auto_advance && self.current == index && index + 1 < self.len() {
            self.current = index + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(items: &[u32]) -> BTreeSet<u32> {
        items.iter().copied().collect()
    }

    fn complete_current(p: &mut Progression, auto_advance: bool) -> bool {
        match p.request_completion().unwrap() {
            CompletionTransition::AlreadyCompleted => false,
            CompletionTransition::Submit { ordinal } => {
                let mut acked = p.completed().clone();
                acked.insert(ordinal);
                p.confirm_completion(ordinal, &acked, auto_advance).unwrap();
                true
            }
        }
    }

    #[test]
    fn fresh_week_unlocks_only_first_chapter() {
        let p = Progression::new(3, &BTreeSet::new()).unwrap();
        assert_eq!(
            p.statuses(),
            &[
                ChapterStatus::Unlocked,
                ChapterStatus::Locked,
                ChapterStatus::Locked
            ]
        );
        assert_eq!(p.current_index(), 0);
    }

    #[test]
    fn persisted_completions_unlock_the_next_chapter() {
        let p = Progression::new(4, &set(&[0, 1])).unwrap();
        assert_eq!(
            p.statuses(),
            &[
                ChapterStatus::Completed,
                ChapterStatus::Completed,
                ChapterStatus::Unlocked,
                ChapterStatus::Locked
            ]
        );
        assert_eq!(p.current_index(), 2);
    }

    #[test]
    fn all_completed_starts_on_last_chapter() {
        let p = Progression::new(3, &set(&[0, 1, 2])).unwrap();
        assert_eq!(p.current_index(), 2);
        assert!(p.is_finished());
    }

    #[test]
    fn zero_chapters_is_an_error() {
        assert_eq!(
            Progression::new(0, &BTreeSet::new()),
            Err(ProgressionError::NoChapters)
        );
    }

    #[test]
    fn navigate_to_locked_chapter_is_rejected_without_change() {
        let mut p = Progression::new(3, &BTreeSet::new()).unwrap();
        assert_eq!(p.navigate(2), Err(ProgressionError::Locked { index: 2 }));
        assert_eq!(p.current_index(), 0);
        assert!(matches!(
            p.navigate(7),
            Err(ProgressionError::OutOfRange { index: 7, len: 3 })
        ));
    }

    #[test]
    fn completion_unlocks_and_advances() {
        let mut p = Progression::new(3, &BTreeSet::new()).unwrap();
        assert!(complete_current(&mut p, true));
        assert_eq!(p.status(0), Some(ChapterStatus::Completed));
        assert_eq!(p.status(1), Some(ChapterStatus::Unlocked));
        assert_eq!(p.status(2), Some(ChapterStatus::Locked));
        assert_eq!(p.current_index(), 1);
    }

    #[test]
    fn completion_without_auto_advance_stays_put() {
        let mut p = Progression::new(2, &BTreeSet::new()).unwrap();
        complete_current(&mut p, false);
        assert_eq!(p.current_index(), 0);
        assert!(p.can_navigate(1));
    }

    #[test]
    fn completing_twice_requests_one_write() {
        let mut p = Progression::new(2, &BTreeSet::new()).unwrap();
        assert!(complete_current(&mut p, false));
        let after_first = p.clone();
        assert!(!complete_current(&mut p, false));
        assert_eq!(p, after_first);
    }

    #[test]
    fn last_chapter_completion_finishes_and_keeps_review_open() {
        let mut p = Progression::new(2, &set(&[0])).unwrap();
        assert_eq!(p.current_index(), 1);
        complete_current(&mut p, true);
        assert!(p.is_finished());
        assert_eq!(p.current_index(), 1);
        p.navigate(0).unwrap();
        assert_eq!(
            p.request_completion().unwrap(),
            CompletionTransition::AlreadyCompleted
        );
    }

    #[test]
    fn confirmation_for_moved_learner_does_not_advance() {
        let mut p = Progression::new(3, &set(&[0])).unwrap();
        let CompletionTransition::Submit { ordinal } = p.request_completion().unwrap() else {
            panic!("expected submit");
        };
        p.navigate(0).unwrap();
        p.confirm_completion(ordinal, &set(&[0, 1]), true).unwrap();
        assert_eq!(p.current_index(), 0);
        assert_eq!(p.status(2), Some(ChapterStatus::Unlocked));
    }

    #[test]
    fn confirmation_never_drops_local_completions() {
        let mut p = Progression::new(3, &set(&[0])).unwrap();
        p.confirm_completion(1, &BTreeSet::new(), false).unwrap();
        assert_eq!(p.completed(), &set(&[0, 1]));
    }

    #[test]
    fn locked_chapter_cannot_be_requested_out_of_band() {
        let p = Progression::new(3, &BTreeSet::new()).unwrap();
        assert_eq!(
            p.request_completion_at(2),
            Err(ProgressionError::Locked { index: 2 })
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Navigate(usize),
        Complete,
        CompleteAt(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..8).prop_map(Op::Navigate),
            Just(Op::Complete),
            (0usize..8).prop_map(Op::CompleteAt),
        ]
    }

    proptest! {
        #[test]
        fn prop_gating_and_monotonicity_hold(
            chapters in 1usize..8,
            ops in proptest::collection::vec(arb_op(), 0..40),
            auto_advance in any::<bool>(),
        ) {
            let mut p = Progression::new(chapters, &BTreeSet::new()).unwrap();
            let mut previous = p.completed().clone();

            for op in ops {
                match op {
                    Op::Navigate(i) => { let _ = p.navigate(i); }
                    Op::Complete => { complete_current(&mut p, auto_advance); }
                    Op::CompleteAt(i) => {
                        if let Ok(CompletionTransition::Submit { ordinal }) = p.request_completion_at(i) {
                            let mut acked = p.completed().clone();
                            acked.insert(ordinal);
                            p.confirm_completion(ordinal, &acked, auto_advance).unwrap();
                        }
                    }
                }

                prop_assert!(previous.is_subset(p.completed()));
                previous = p.completed().clone();

                for i in 1..p.len() {
                    if p.status(i) != Some(ChapterStatus::Locked) {
                        prop_assert!(p.completed().contains(&((i - 1) as u32)));
                    }
                }
                prop_assert!(p.can_navigate(p.current_index()));
            }
        }
    }
}
