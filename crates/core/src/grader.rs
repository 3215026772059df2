//! Quiz grading.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::progress::round_half_up;
use crate::model::{QuestionId, QuizQuestion};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GradeError {
    #[error("quiz has no questions")]
    NoQuestions,

    #[error("{} question(s) unanswered", missing.len())]
    Unanswered { missing: Vec<QuestionId> },

    #[error("answer given for unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("question {question} has {options} options, selected {selected}")]
    OptionOutOfRange {
        question: QuestionId,
        selected: usize,
        options: usize,
    },

    #[error("expected {expected} answers, got {got}")]
    AnswerCountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub selected: usize,
    pub correct_answer: usize,
    pub is_correct: bool,
}

/// Outcome of grading a complete set of answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizGrade {
    pub score: u8,
    pub correct: usize,
    pub total: usize,
    /// Per-question flags in question order, for review rendering.
    pub results: Vec<QuestionResult>,
}

/// Grade `answers` against `questions`.
///
/// Every question must be answered; partial submissions are refused rather
/// than scored. The score is `round(100 * correct / total)` with halves
/// rounded up.
///
/// # Errors
///
/// Returns `GradeError` if the quiz is empty, an answer names an unknown
/// question, a question is unanswered, or a selection is not a valid option.
pub fn grade(
    questions: &[QuizQuestion],
    answers: &BTreeMap<QuestionId, usize>,
) -> Result<QuizGrade, GradeError> {
    if questions.is_empty() {
        return Err(GradeError::NoQuestions);
    }

    if let Some(unknown) = answers
        .keys()
        .find(|id| !questions.iter().any(|q| &q.id == *id))
    {
        return Err(GradeError::UnknownQuestion(unknown.clone()));
    }

    let missing: Vec<QuestionId> = questions
        .iter()
        .filter(|q| !answers.contains_key(&q.id))
        .map(|q| q.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(GradeError::Unanswered { missing });
    }

    let mut results = Vec::with_capacity(questions.len());
    for question in questions {
        let selected = answers[&question.id];
        if selected >= question.options.len() {
            return Err(GradeError::OptionOutOfRange {
                question: question.id.clone(),
                selected,
                options: question.options.len(),
            });
        }
        results.push(QuestionResult {
            question_id: question.id.clone(),
            selected,
            correct_answer: question.correct_answer,
            is_correct: selected == question.correct_answer,
        });
    }

    let total = results.len();
    let correct = results.iter().filter(|r| r.is_correct).count();
    let score = round_half_up(100 * correct as u64, total as u64);

    Ok(QuizGrade {
        score: u8::try_from(score).unwrap_or(100),
        correct,
        total,
        results,
    })
}

/// Map a positional answer list onto question ids.
///
/// # Errors
///
/// Returns `GradeError::AnswerCountMismatch` unless there is exactly one
/// answer per question.
pub fn answers_from_ordered(
    questions: &[QuizQuestion],
    ordered: &[usize],
) -> Result<BTreeMap<QuestionId, usize>, GradeError> {
    if ordered.len() != questions.len() {
        return Err(GradeError::AnswerCountMismatch {
            expected: questions.len(),
            got: ordered.len(),
        });
    }
    Ok(questions
        .iter()
        .zip(ordered)
        .map(|(q, a)| (q.id.clone(), *a))
        .collect())
}

/// Lay answers out in question order, the shape stores accept.
///
/// # Errors
///
/// Returns `GradeError::Unanswered` if any question has no answer.
pub fn ordered_answers(
    questions: &[QuizQuestion],
    answers: &BTreeMap<QuestionId, usize>,
) -> Result<Vec<usize>, GradeError> {
    let mut ordered = Vec::with_capacity(questions.len());
    let mut missing = Vec::new();
    for question in questions {
        match answers.get(&question.id) {
            Some(selected) => ordered.push(*selected),
            None => missing.push(question.id.clone()),
        }
    }
    if missing.is_empty() {
        Ok(ordered)
    } else {
        Err(GradeError::Unanswered { missing })
    }
}
