//! Client for a remote progress service speaking JSON over HTTP.
//!
//! Routes (relative to the base URL, which usually ends in `/api`):
//!
//! | call                    | route                                                   |
//! |-------------------------|---------------------------------------------------------|
//! | weekly content          | `GET  /week/{candidate}/{week}`                         |
//! | week progress           | `GET  /progress/{candidate}/week/{week}`                |
//! | mark chapter complete   | `POST /progress/{candidate}/week/{week}/chapter/{n}/complete` |
//! | submit quiz / task      | `POST /progress/{candidate}`                            |
//! | plan weeks              | `GET  /study-plan/{candidate}`                          |
//!
//! The service has no overall-progress route, so overall progress is scored
//! client-side from the plan and per-week records.
//!
//! The service's `quiz_score` is the number of answered questions, not a
//! grade. It is read back as the answered share of the week's quiz.

use std::collections::BTreeSet;

use async_trait::async_trait;
use curriculum_core::model::{
    CandidateId, CodingTask, OverallProgress, ProgressKey, ProgressRecord, QuizQuestion,
    ReadingMaterial, Readiness, TaskId, WeekNumber, WeeklyContent, round_half_up,
};
use curriculum_core::segmenter::Segmenter;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::repository::{ContentSource, ProgressStore, QuizAck, StorageError, overall_from};

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub base_url: String,
}

#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    segmenter: Segmenter,
}

impl HttpStore {
    #[must_use]
    pub fn new(config: HttpStoreConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            segmenter: Segmenter::default(),
        }
    }

    #[must_use]
    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, StorageError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn post_json<B: Serialize + Sync, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, StorageError> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn status_error(status: StatusCode) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::CONFLICT => StorageError::Conflict(status.to_string()),
        s if s == StatusCode::BAD_REQUEST || s == StatusCode::UNPROCESSABLE_ENTITY => {
            StorageError::Rejected(s.to_string())
        }
        s => StorageError::Status(s.as_u16()),
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, StorageError> {
    let status = response.status();
    if !status.is_success() {
        tracing::debug!(%status, url = %response.url(), "store returned error status");
        return Err(status_error(status));
    }
    response
        .json()
        .await
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

//
// ─── WIRE SHAPES ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
struct WeekProgressDto {
    #[serde(default)]
    completed_chapters: Vec<u32>,
    #[serde(default)]
    completed_tasks: Vec<TaskId>,
    #[serde(default)]
    quiz_score: Option<i64>,
}

impl WeekProgressDto {
    fn into_record(self, key: ProgressKey, questions: usize) -> ProgressRecord {
        ProgressRecord::from_persisted(
            key,
            self.completed_chapters.into_iter().collect(),
            self.completed_tasks.into_iter().collect(),
            None,
            self.quiz_score
                .and_then(|answered| answered_percent(answered, questions)),
            None,
        )
    }
}

/// `answered / questions` as a percent, capped at 100. `None` without a quiz.
fn answered_percent(answered: i64, questions: usize) -> Option<u8> {
    let questions = u64::try_from(questions).ok().filter(|q| *q > 0)?;
    let answered = u64::try_from(answered).unwrap_or(0).min(questions);
    u8::try_from(round_half_up(100 * answered, questions)).ok()
}

#[derive(Debug, Deserialize)]
struct ChapterCompleteDto {
    #[serde(default)]
    completed_chapters: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct ProgressUpdateDto<'a> {
    week_number: WeekNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<&'a TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quiz_answers: Option<&'a [usize]>,
}

#[derive(Debug, Deserialize)]
struct MessageDto {}

/// The service reports not-yet-generated parts as empty values rather than
/// `null`, so both are treated as pending.
#[derive(Debug, Deserialize)]
struct WeeklyContentDto {
    week_number: WeekNumber,
    #[serde(default)]
    reading_material: Option<ReadingMaterial>,
    #[serde(default)]
    coding_tasks: Option<Vec<CodingTask>>,
    #[serde(default)]
    quiz: Option<Vec<QuizQuestion>>,
}

impl WeeklyContentDto {
    fn into_content(self) -> WeeklyContent {
        fn non_empty<T>(items: Option<Vec<T>>) -> Readiness<Vec<T>> {
            items.filter(|v| !v.is_empty()).into()
        }
        WeeklyContent {
            week_number: self.week_number,
            reading_material: self
                .reading_material
                .filter(|r| !r.content.trim().is_empty())
                .into(),
            coding_tasks: non_empty(self.coding_tasks),
            quiz: non_empty(self.quiz),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StudyPlanDto {
    #[serde(default)]
    weeks: Vec<WeeklyContentDto>,
}

//
// ─── TRAIT IMPLS ───────────────────────────────────────────────────────────────
//

impl HttpStore {
    async fn fetch_week_record(
        &self,
        key: ProgressKey,
        questions: usize,
    ) -> Result<ProgressRecord, StorageError> {
        let dto: WeekProgressDto = self
            .get_json(&format!("/progress/{}/week/{}", key.candidate, key.week))
            .await?;
        Ok(dto.into_record(key, questions))
    }
}

fn question_count(content: &WeeklyContent) -> usize {
    content.questions().map_or(0, <[_]>::len)
}

#[async_trait]
impl ProgressStore for HttpStore {
    async fn fetch_progress(&self, key: ProgressKey) -> Result<ProgressRecord, StorageError> {
        let questions = match self.fetch_weekly_content(key.candidate, key.week).await {
            Ok(content) => question_count(&content),
            Err(StorageError::NotFound) => 0,
            Err(e) => return Err(e),
        };
        self.fetch_week_record(key, questions).await
    }

    async fn fetch_overall_progress(
        &self,
        candidate: CandidateId,
    ) -> Result<OverallProgress, StorageError> {
        let plan: StudyPlanDto = self.get_json(&format!("/study-plan/{candidate}")).await?;
        let mut rows = Vec::with_capacity(plan.weeks.len());
        for week in plan.weeks {
            let content = week.into_content();
            let key = ProgressKey::new(candidate, content.week_number);
            let record = self.fetch_week_record(key, question_count(&content)).await?;
            rows.push((content.week_number, Some(content), Some(record)));
        }
        Ok(overall_from(rows, &self.segmenter))
    }

    async fn mark_chapter_complete(
        &self,
        key: ProgressKey,
        chapter: u32,
    ) -> Result<BTreeSet<u32>, StorageError> {
        let path = format!(
            "/progress/{}/week/{}/chapter/{chapter}/complete",
            key.candidate, key.week
        );
        let dto: ChapterCompleteDto = self.post_json::<(), _>(&path, None).await?;
        Ok(dto.completed_chapters.into_iter().collect())
    }

    async fn submit_quiz(
        &self,
        key: ProgressKey,
        answers: &[usize],
    ) -> Result<QuizAck, StorageError> {
        let body = ProgressUpdateDto {
            week_number: key.week,
            task_id: None,
            quiz_answers: Some(answers),
        };
        let _: MessageDto = self
            .post_json(&format!("/progress/{}", key.candidate), Some(&body))
            .await?;
        Ok(QuizAck::default())
    }

    async fn complete_task(&self, key: ProgressKey, task: &TaskId) -> Result<(), StorageError> {
        let body = ProgressUpdateDto {
            week_number: key.week,
            task_id: Some(task),
            quiz_answers: None,
        };
        let _: MessageDto = self
            .post_json(&format!("/progress/{}", key.candidate), Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentSource for HttpStore {
    async fn fetch_weekly_content(
        &self,
        candidate: CandidateId,
        week: WeekNumber,
    ) -> Result<WeeklyContent, StorageError> {
        let dto: WeeklyContentDto = self.get_json(&format!("/week/{candidate}/{week}")).await?;
        Ok(dto.into_content())
    }

    async fn plan_weeks(&self, candidate: CandidateId) -> Result<Vec<WeekNumber>, StorageError> {
        let plan: StudyPlanDto = self.get_json(&format!("/study-plan/{candidate}")).await?;
        let mut weeks: Vec<WeekNumber> = plan.weeks.iter().map(|w| w.week_number).collect();
        weeks.sort();
        Ok(weeks)
    }
}
