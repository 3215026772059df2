#![forbid(unsafe_code)]

pub mod config;
pub mod content_poll;
pub mod error;
pub mod session;
pub mod synchronizer;

pub use curriculum_core::Clock;

pub use config::{CurriculumConfig, PollPolicy, QuizResubmitPolicy};
pub use content_poll::{PollCanceller, PollError, wait_for_content};
pub use error::{ConfigError, ErrorKind, SyncError};
pub use session::{
    ChapterCompletion, LearnerSession, LoadedWeek, QuizSubmission, TaskCompletion, Ticket,
    WeekSession,
};
pub use synchronizer::ProgressSynchronizer;
