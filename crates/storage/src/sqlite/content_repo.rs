use chrono::Utc;
use curriculum_core::model::{CandidateId, WeekNumber, WeeklyContent};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    candidate_to_i64, conn, map_content_row, part_to_json, ser, week_from_i64, week_to_i64,
};
use crate::repository::{ContentSource, StorageError};

impl SqliteRepository {
    /// Insert or replace a week of generated content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if encoding or the write fails.
    pub async fn upsert_weekly_content(
        &self,
        candidate: CandidateId,
        content: &WeeklyContent,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO weekly_content (
                    candidate_id, week_number, reading_material, coding_tasks, quiz, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(candidate_id, week_number) DO UPDATE SET
                    reading_material = excluded.reading_material,
                    coding_tasks = excluded.coding_tasks,
                    quiz = excluded.quiz
            ",
        )
        .bind(candidate_to_i64(candidate)?)
        .bind(week_to_i64(content.week_number))
        .bind(part_to_json(&content.reading_material)?)
        .bind(part_to_json(&content.coding_tasks)?)
        .bind(part_to_json(&content.quiz)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        tracing::debug!(
            candidate = %candidate,
            week = %content.week_number,
            missing = ?content.missing_parts(),
            "stored weekly content"
        );
        Ok(())
    }

    pub(crate) async fn load_content(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<Option<WeeklyContent>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT week_number, reading_material, coding_tasks, quiz
                FROM weekly_content
                WHERE candidate_id = ?1 AND week_number = ?2
            ",
        )
        .bind(candidate_to_i64(candidate)?)
        .bind(week_to_i64(week))
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|row| map_content_row(&row)).transpose()
    }
}

#[async_trait::async_trait]
impl ContentSource for SqliteRepository {
    async fn fetch_weekly_content(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<WeeklyContent, StorageError> {
        self.load_content(candidate, week)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn plan_weeks(&self, candidate: CandidateId) -> Result<Vec<WeekNumber>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT week_number
                FROM weekly_content
                WHERE candidate_id = ?1
                ORDER BY week_number ASC
            ",
        )
        .bind(candidate_to_i64(candidate)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| week_from_i64(row.try_get::<i64, _>("week_number").map_err(ser)?))
            .collect()
    }
}
