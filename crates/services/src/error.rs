//! Shared error types for the services crate.

use std::path::PathBuf;

use thiserror::Error;

use curriculum_core::grader::GradeError;
use curriculum_core::model::{ContentPart, ProgressKey};
use curriculum_core::progression::ProgressionError;
use curriculum_core::segmenter::SegmentError;
use curriculum_core::tasks::TaskError;
use storage::repository::StorageError;

/// How a failure should be handled by whoever shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A local precondition failed; nothing reached the store.
    Validation,
    /// Content is still being generated; show a pending state.
    NotReady,
    /// The store call failed; local state is unchanged and the call may be
    /// re-issued.
    SyncFailure,
    /// The response belongs to a week that is no longer active.
    StaleResponse,
}

/// Errors emitted by the learner session and synchronizer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error(transparent)]
    Grade(#[from] GradeError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("no week is open")]
    NoWeek,
    #[error("week is still loading")]
    NotLoaded,
    #[error("{0} has not been generated yet")]
    NotReady(ContentPart),
    #[error("response for {key} arrived after the session moved on")]
    Stale { key: ProgressKey },
    #[error("quiz was already submitted")]
    QuizAlreadySubmitted,
    #[error("question {0} does not exist")]
    UnknownQuestion(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Stale { .. } => ErrorKind::StaleResponse,
            Self::Storage(_) => ErrorKind::SyncFailure,
            Self::Progression(_)
            | Self::Grade(_)
            | Self::Task(_)
            | Self::NoWeek
            | Self::NotLoaded
            | Self::QuizAlreadySubmitted
            | Self::UnknownQuestion(_) => ErrorKind::Validation,
        }
    }
}

/// Errors emitted while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_onto_the_taxonomy() {
        assert_eq!(SyncError::NotLoaded.kind(), ErrorKind::Validation);
        assert_eq!(
            SyncError::Grade(GradeError::NoQuestions).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SyncError::NotReady(ContentPart::Quiz).kind(),
            ErrorKind::NotReady
        );
        assert_eq!(
            SyncError::Storage(StorageError::NotFound).kind(),
            ErrorKind::SyncFailure
        );
    }
}
