use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use curriculum_core::model::{
    CandidateId, ProgressKey, ProgressRecord, QuestionId, Readiness, TaskId, WeekNumber,
    WeeklyContent,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn candidate_to_i64(id: CandidateId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("candidate_id overflow".into()))
}

pub(crate) fn week_to_i64(week: WeekNumber) -> i64 {
    i64::from(week.value())
}

pub(crate) fn week_from_i64(v: i64) -> Result<WeekNumber, StorageError> {
    u32::try_from(v)
        .map(WeekNumber::new)
        .map_err(|_| StorageError::Serialization(format!("invalid week_number: {v}")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

fn from_json<T: DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

fn part_from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: Option<String>,
) -> Result<Readiness<T>, StorageError> {
    raw.map(|s| from_json(field, &s)).transpose().map(Readiness::from)
}

/// JSON for a content part, or `None` while it is pending.
pub(crate) fn part_to_json<T: Serialize>(
    part: &Readiness<T>,
) -> Result<Option<String>, StorageError> {
    part.as_ready().map(to_json).transpose()
}

pub(crate) fn map_progress_row(
    key: ProgressKey,
    row: &SqliteRow,
) -> Result<ProgressRecord, StorageError> {
    let chapters: String = row.try_get("completed_chapters").map_err(ser)?;
    let tasks: String = row.try_get("completed_tasks").map_err(ser)?;
    let answers: Option<String> = row.try_get("quiz_answers").map_err(ser)?;
    let score: Option<i64> = row.try_get("quiz_score").map_err(ser)?;
    let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at").map_err(ser)?;

    let completed_chapters: BTreeSet<u32> = from_json("completed_chapters", &chapters)?;
    let completed_tasks: BTreeSet<TaskId> = from_json("completed_tasks", &tasks)?;
    let quiz_answers: Option<BTreeMap<QuestionId, usize>> = answers
        .map(|raw| from_json("quiz_answers", &raw))
        .transpose()?;
    let quiz_score = score
        .map(|v| {
            u8::try_from(v)
                .ok()
                .filter(|s| *s <= 100)
                .ok_or_else(|| StorageError::Serialization(format!("invalid quiz_score: {v}")))
        })
        .transpose()?;

    Ok(ProgressRecord::from_persisted(
        key,
        completed_chapters,
        completed_tasks,
        quiz_answers,
        quiz_score,
        updated_at,
    ))
}

pub(crate) fn map_content_row(row: &SqliteRow) -> Result<WeeklyContent, StorageError> {
    let week_number = week_from_i64(row.try_get::<i64, _>("week_number").map_err(ser)?)?;
    Ok(WeeklyContent {
        week_number,
        reading_material: part_from_json(
            "reading_material",
            row.try_get("reading_material").map_err(ser)?,
        )?,
        coding_tasks: part_from_json("coding_tasks", row.try_get("coding_tasks").map_err(ser)?)?,
        quiz: part_from_json("quiz", row.try_get("quiz").map_err(ser)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_from_negative_is_rejected() {
        assert!(week_from_i64(-1).is_err());
        assert_eq!(week_from_i64(4).unwrap(), WeekNumber::new(4));
    }

    #[test]
    fn pending_part_maps_to_null() {
        let pending: Readiness<Vec<u32>> = Readiness::Pending;
        assert_eq!(part_to_json(&pending).unwrap(), None);
        let ready = Readiness::Ready(vec![1_u32, 2]);
        assert_eq!(part_to_json(&ready).unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn malformed_part_is_a_serialization_error() {
        let err = part_from_json::<Vec<u32>>("quiz", Some("{oops".into())).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(msg) if msg.contains("quiz")));
    }
}
