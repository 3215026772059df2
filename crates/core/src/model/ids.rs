use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Learner identity against which progress is tracked.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(u64);

impl CandidateId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One-based week index within a learning plan.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekNumber(u32);

impl WeekNumber {
    #[must_use]
    pub const fn new(week: u32) -> Self {
        Self(week)
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Identifier of a coding task, assigned by the content generator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a quiz question, assigned by the content generator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(String);

impl QuestionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The (candidate, week) pair that owns one progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgressKey {
    pub candidate: CandidateId,
    pub week: WeekNumber,
}

impl ProgressKey {
    #[must_use]
    pub const fn new(candidate: CandidateId, week: WeekNumber) -> Self {
        Self { candidate, week }
    }
}

// ─── Debug / Display ───────────────────────────────────────────────────────────

impl fmt::Debug for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CandidateId({})", self.0)
    }
}

impl fmt::Debug for WeekNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeekNumber({})", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", self.0)
    }
}

impl fmt::Debug for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuestionId({:?})", self.0)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WeekNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "candidate {} week {}", self.candidate, self.week)
    }
}

// ─── FromStr ───────────────────────────────────────────────────────────────────

/// Error type for parsing an identifier from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse {kind} from {raw:?}")]
pub struct ParseIdError {
    kind: &'static str,
    raw: String,
}

impl FromStr for CandidateId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self::new).map_err(|_| ParseIdError {
            kind: "CandidateId",
            raw: s.to_owned(),
        })
    }
}

impl FromStr for WeekNumber {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self::new).map_err(|_| ParseIdError {
            kind: "WeekNumber",
            raw: s.to_owned(),
        })
    }
}

impl FromStr for TaskId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                kind: "TaskId",
                raw: s.to_owned(),
            });
        }
        Ok(Self::new(trimmed))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_id_parses_and_displays() {
        let id: CandidateId = " 42 ".parse().unwrap();
        assert_eq!(id, CandidateId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn week_number_rejects_garbage() {
        let err = "week-one".parse::<WeekNumber>().unwrap_err();
        assert!(err.to_string().contains("WeekNumber"));
    }

    #[test]
    fn task_id_rejects_blank() {
        assert!("   ".parse::<TaskId>().is_err());
        assert_eq!("task_1".parse::<TaskId>().unwrap(), TaskId::new("task_1"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&TaskId::new("t1")).unwrap();
        assert_eq!(json, "\"t1\"");
        let week: WeekNumber = serde_json::from_str("3").unwrap();
        assert_eq!(week.value(), 3);
    }

    #[test]
    fn progress_key_display_names_both_parts() {
        let key = ProgressKey::new(CandidateId::new(7), WeekNumber::new(2));
        assert_eq!(key.to_string(), "candidate 7 week 2");
    }
}
