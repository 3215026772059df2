mod chapter;
mod content;
mod ids;
pub(crate) mod progress;

pub use chapter::Chapter;
pub use content::{CodingTask, ContentPart, QuizQuestion, ReadingMaterial, Readiness, WeeklyContent};
pub use ids::{CandidateId, ParseIdError, ProgressKey, QuestionId, TaskId, WeekNumber};
pub use progress::{
    OverallProgress, ProgressRecord, QuizAnswers, WeekProgress, WeekTotals, QUIZ_WEIGHT, READING_WEIGHT,
    TASK_WEIGHT, round_half_up,
};
