use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the progress schema.
///
/// Version 1 creates `weekly_content` and `progress`. JSON columns hold the
/// generated content parts and the completion sets; a `NULL` content part is a
/// part that has not been generated yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS weekly_content (
                    candidate_id INTEGER NOT NULL,
                    week_number INTEGER NOT NULL CHECK (week_number >= 0),
                    reading_material TEXT,
                    coding_tasks TEXT,
                    quiz TEXT,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (candidate_id, week_number)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS progress (
                    candidate_id INTEGER NOT NULL,
                    week_number INTEGER NOT NULL CHECK (week_number >= 0),
                    completed_chapters TEXT NOT NULL DEFAULT '[]',
                    completed_tasks TEXT NOT NULL DEFAULT '[]',
                    quiz_answers TEXT,
                    quiz_score INTEGER CHECK (quiz_score BETWEEN 0 AND 100),
                    updated_at TEXT,
                    PRIMARY KEY (candidate_id, week_number)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied sqlite migration");
    }

    Ok(())
}
