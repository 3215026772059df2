use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::model::ids::{QuestionId, TaskId, WeekNumber};

//
// ─── READINESS ─────────────────────────────────────────────────────────────────
//

/// Generation state of one part of a week's content.
///
/// Parts are generated independently, so a week can have its reading ready
/// while the quiz is still pending. On the wire a pending part is `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Readiness<T> {
    #[default]
    Pending,
    Ready(T),
}

impl<T> Readiness<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    #[must_use]
    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Readiness::Ready(value) => Some(value),
            Readiness::Pending => None,
        }
    }

    #[must_use]
    pub fn into_ready(self) -> Option<T> {
        match self {
            Readiness::Ready(value) => Some(value),
            Readiness::Pending => None,
        }
    }
}

impl<T> From<Option<T>> for Readiness<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Readiness::Pending, Readiness::Ready)
    }
}

impl<T: Serialize> Serialize for Readiness<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Readiness::Pending => serializer.serialize_none(),
            Readiness::Ready(value) => serializer.serialize_some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Readiness<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

/// Names one independently generated part of a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPart {
    Reading,
    Tasks,
    Quiz,
}

impl fmt::Display for ContentPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentPart::Reading => "reading material",
            ContentPart::Tasks => "coding tasks",
            ContentPart::Quiz => "quiz",
        };
        f.write_str(name)
    }
}

//
// ─── PARTS ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingMaterial {
    pub title: String,
    /// Markdown body, structured with `## ` section headers.
    pub content: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingTask {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: QuestionId,
    #[serde(default)]
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: String,
}

//
// ─── WEEK ──────────────────────────────────────────────────────────────────────
//

/// Generated learning material for one week. Read-only once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyContent {
    pub week_number: WeekNumber,
    #[serde(default)]
    pub reading_material: Readiness<ReadingMaterial>,
    #[serde(default)]
    pub coding_tasks: Readiness<Vec<CodingTask>>,
    #[serde(default)]
    pub quiz: Readiness<Vec<QuizQuestion>>,
}

impl WeeklyContent {
    /// A week with nothing generated yet.
    #[must_use]
    pub fn pending(week_number: WeekNumber) -> Self {
        Self {
            week_number,
            reading_material: Readiness::Pending,
            coding_tasks: Readiness::Pending,
            quiz: Readiness::Pending,
        }
    }

    #[must_use]
    pub fn reading(&self) -> Option<&ReadingMaterial> {
        self.reading_material.as_ready()
    }

    #[must_use]
    pub fn tasks(&self) -> Option<&[CodingTask]> {
        self.coding_tasks.as_ready().map(Vec::as_slice)
    }

    #[must_use]
    pub fn questions(&self) -> Option<&[QuizQuestion]> {
        self.quiz.as_ready().map(Vec::as_slice)
    }

    /// Parts that have not been generated yet, in display order.
    #[must_use]
    pub fn missing_parts(&self) -> Vec<ContentPart> {
        let mut missing = Vec::new();
        if !self.reading_material.is_ready() {
            missing.push(ContentPart::Reading);
        }
        if !self.coding_tasks.is_ready() {
            missing.push(ContentPart::Tasks);
        }
        if !self.quiz.is_ready() {
            missing.push(ContentPart::Quiz);
        }
        missing
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.missing_parts().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_parts_deserialize_as_pending() {
        let json = r###"{
            "week_number": 2,
            "reading_material": {"title": "Intro", "content": "## A\nbody"},
            "coding_tasks": null
        }"###;
        let week: WeeklyContent = serde_json::from_str(json).unwrap();

        assert_eq!(week.week_number, WeekNumber::new(2));
        assert_eq!(week.reading().unwrap().title, "Intro");
        assert_eq!(
            week.missing_parts(),
            vec![ContentPart::Tasks, ContentPart::Quiz]
        );
        assert!(!week.is_ready());
    }

    #[test]
    fn pending_serializes_as_null() {
        let week = WeeklyContent::pending(WeekNumber::new(1));
        let value = serde_json::to_value(&week).unwrap();
        assert!(value["quiz"].is_null());
        assert!(value["reading_material"].is_null());
    }

    #[test]
    fn ready_week_reports_no_missing_parts() {
        let mut week = WeeklyContent::pending(WeekNumber::new(1));
        week.reading_material = Readiness::Ready(ReadingMaterial {
            title: "T".into(),
            content: String::new(),
            key_concepts: Vec::new(),
            resources: Vec::new(),
        });
        week.coding_tasks = Readiness::Ready(Vec::new());
        week.quiz = Readiness::Ready(Vec::new());
        assert!(week.is_ready());
    }
}
