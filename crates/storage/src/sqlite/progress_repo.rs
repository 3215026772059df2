use std::collections::BTreeSet;

use curriculum_core::model::{CandidateId, OverallProgress, ProgressKey, ProgressRecord, TaskId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{candidate_to_i64, conn, map_progress_row, to_json, week_to_i64};
use crate::repository::{
    ContentSource, ProgressStore, QuizAck, StorageError, apply_chapter_completion,
    grade_submission, overall_from,
};

async fn load_record(
    db: &mut SqliteConnection,
    key: ProgressKey,
) -> Result<Option<ProgressRecord>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT completed_chapters, completed_tasks, quiz_answers, quiz_score, updated_at
            FROM progress
            WHERE candidate_id = ?1 AND week_number = ?2
        ",
    )
    .bind(candidate_to_i64(key.candidate)?)
    .bind(week_to_i64(key.week))
    .fetch_optional(&mut *db)
    .await
    .map_err(conn)?;

    row.map(|row| map_progress_row(key, &row)).transpose()
}

async fn save_record(db: &mut SqliteConnection, record: &ProgressRecord) -> Result<(), StorageError> {
    let answers = record.quiz_answers().map(to_json).transpose()?;

    sqlx::query(
        r"
            INSERT INTO progress (
                candidate_id, week_number, completed_chapters, completed_tasks,
                quiz_answers, quiz_score, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(candidate_id, week_number) DO UPDATE SET
                completed_chapters = excluded.completed_chapters,
                completed_tasks = excluded.completed_tasks,
                quiz_answers = excluded.quiz_answers,
                quiz_score = excluded.quiz_score,
                updated_at = excluded.updated_at
        ",
    )
    .bind(candidate_to_i64(record.candidate_id())?)
    .bind(week_to_i64(record.week_number()))
    .bind(to_json(record.completed_chapters())?)
    .bind(to_json(record.completed_tasks())?)
    .bind(answers)
    .bind(record.quiz_score().map(i64::from))
    .bind(record.updated_at())
    .execute(&mut *db)
    .await
    .map_err(conn)?;

    Ok(())
}

impl SqliteRepository {
    /// Load-modify-store inside one transaction.
    async fn update_record<T: Send>(
        &self,
        key: ProgressKey,
        f: impl FnOnce(&mut ProgressRecord) -> Result<(T, bool), StorageError> + Send,
    ) -> Result<T, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let mut record = load_record(&mut tx, key)
            .await?
            .unwrap_or_else(|| ProgressRecord::empty(key));

        let (out, changed) = f(&mut record)?;
        if changed {
            record.touch(self.clock.now());
            save_record(&mut tx, &record).await?;
        }
        tx.commit().await.map_err(conn)?;
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn fetch_progress(&self, key: ProgressKey) -> Result<ProgressRecord, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        Ok(load_record(&mut db, key)
            .await?
            .unwrap_or_else(|| ProgressRecord::empty(key)))
    }

    async fn fetch_overall_progress(
        &self,
        candidate: CandidateId,
    ) -> Result<OverallProgress, StorageError> {
        let weeks = self.plan_weeks(candidate).await?;
        let mut rows = Vec::with_capacity(weeks.len());
        let mut db = self.pool.acquire().await.map_err(conn)?;
        for week in weeks {
            let key = ProgressKey::new(candidate, week);
            let content = self.load_content(candidate, week).await?;
            let record = load_record(&mut db, key).await?;
            rows.push((week, content, record));
        }
        Ok(overall_from(rows, &self.segmenter))
    }

    async fn mark_chapter_complete(
        &self,
        key: ProgressKey,
        chapter: u32,
    ) -> Result<BTreeSet<u32>, StorageError> {
        self.update_record(key, |record| {
            let grew = apply_chapter_completion(record, chapter)?;
            Ok((record.completed_chapters().clone(), grew))
        })
        .await
    }

    async fn submit_quiz(
        &self,
        key: ProgressKey,
        answers: &[usize],
    ) -> Result<QuizAck, StorageError> {
        let content = self
            .load_content(key.candidate, key.week)
            .await?
            .ok_or(StorageError::NotFound)?;
        let (mapped, score) = grade_submission(&content, answers)?;
        self.update_record(key, move |record| {
            record.record_quiz(mapped, score);
            Ok((QuizAck { score: Some(score) }, true))
        })
        .await
    }

    async fn complete_task(&self, key: ProgressKey, task: &TaskId) -> Result<(), StorageError> {
        let task = task.clone();
        self.update_record(key, move |record| Ok(((), record.insert_task(task))))
            .await
    }
}
